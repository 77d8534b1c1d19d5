//! 随机标识生成
//!
//! 唯一性由存储层的唯一约束保证：生成器只负责产生候选值，
//! 插入冲突时重新生成，超过次数上限后放弃。

use std::future::Future;
use std::sync::{Arc, Mutex};

use domain::{RepositoryError, ServerError, ServerErrorCode, UniqueKey};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, warn};

/// 标识字符集
pub const ID_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
pub const ACCOUNT_ID_LEN: usize = 12;
pub const ROOM_ID_LEN: usize = 16;
pub const SESSION_TOKEN_LEN: usize = 32;
pub const SMS_CODE_LEN: usize = 6;

pub trait RandomSource: Send + Sync {
    /// 返回 `0..upper` 范围内的随机数
    fn next_index(&self, upper: usize) -> usize;
}

/// 线程本地随机数
#[derive(Debug, Default)]
pub struct ThreadRandomSource;

impl RandomSource for ThreadRandomSource {
    fn next_index(&self, upper: usize) -> usize {
        rand::rng().random_range(0..upper)
    }
}

/// 固定种子，测试中得到可复现的序列
#[derive(Debug)]
pub struct SeededRandomSource {
    rng: Mutex<StdRng>,
}

impl SeededRandomSource {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandomSource {
    fn next_index(&self, upper: usize) -> usize {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.random_range(0..upper)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UniqueInsertError {
    #[error("no unique value after {0} attempts")]
    Exhausted(u32),
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl From<UniqueInsertError> for ServerError {
    fn from(err: UniqueInsertError) -> Self {
        match err {
            UniqueInsertError::Exhausted(_) => {
                ServerError::new(ServerErrorCode::GenerationExhausted, err.to_string())
            }
            UniqueInsertError::Repository(err) => err.into(),
        }
    }
}

pub struct IdGenerator {
    random: Arc<dyn RandomSource>,
    max_attempts: u32,
}

impl IdGenerator {
    pub fn new(random: Arc<dyn RandomSource>, max_attempts: u32) -> Self {
        Self {
            random,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 生成定长的小写字母数字串
    pub fn generate(&self, len: usize) -> String {
        self.pick(len, ID_ALPHABET)
    }

    /// 生成定长数字验证码
    pub fn numeric_code(&self, len: usize) -> String {
        self.pick(len, &ID_ALPHABET[..10])
    }

    fn pick(&self, len: usize, alphabet: &[u8]) -> String {
        (0..len)
            .map(|_| char::from(alphabet[self.random.next_index(alphabet.len())]))
            .collect()
    }

    /// 用新生成的候选值调用 `insert`，主键或令牌冲突时重试。
    ///
    /// 其它结果（包括其它唯一约束冲突）原样返回给调用方。
    pub async fn insert_unique<T, F, Fut>(
        &self,
        len: usize,
        mut insert: F,
    ) -> Result<T, UniqueInsertError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, RepositoryError>>,
    {
        for attempt in 1..=self.max_attempts {
            let candidate = self.generate(len);
            match insert(candidate).await {
                Err(RepositoryError::Conflict(key @ (UniqueKey::Id | UniqueKey::Token))) => {
                    debug!(attempt, ?key, "generated value collided, retrying");
                }
                other => return other.map_err(UniqueInsertError::from),
            }
        }

        warn!(attempts = self.max_attempts, len, "unique value generation exhausted");
        Err(UniqueInsertError::Exhausted(self.max_attempts))
    }
}
