#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use application::{
    AccountService, AccountServiceDependencies, AccountSettings, FixedClock, IdGenerator,
    RoomService, RoomServiceDependencies, RoomSettings, SeededRandomSource, SmsError, SmsGateway,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use domain::{AccountId, PhoneNumber};
use infrastructure::{Infrastructure, MemoryStore};

/// 记录最近一次下发的验证码
#[derive(Default)]
pub struct RecordingSms {
    codes: Mutex<HashMap<String, String>>,
}

impl RecordingSms {
    pub fn last_code(&self, phone: &str) -> Option<String> {
        self.codes.lock().unwrap().get(phone).cloned()
    }
}

#[async_trait]
impl SmsGateway for RecordingSms {
    async fn send_code(&self, phone_number: &PhoneNumber, code: &str) -> Result<(), SmsError> {
        self.codes
            .lock()
            .unwrap()
            .insert(phone_number.as_str().to_string(), code.to_string());
        Ok(())
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub sms: Arc<RecordingSms>,
    pub clock: Arc<FixedClock>,
    pub accounts: AccountService,
    pub rooms: RoomService,
}

pub fn test_app(max_rooms: u32) -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let sms = Arc::new(RecordingSms::default());
    let clock = Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap(),
    ));
    let id_generator = Arc::new(IdGenerator::new(Arc::new(SeededRandomSource::new(42)), 5));

    let infra = Infrastructure {
        account_repository: store.clone(),
        session_repository: store.clone(),
        code_repository: store.clone(),
        room_repository: store.clone(),
        sms_gateway: sms.clone(),
    };

    let accounts = AccountService::new(AccountServiceDependencies {
        account_repository: infra.account_repository.clone(),
        session_repository: infra.session_repository.clone(),
        code_repository: infra.code_repository.clone(),
        sms_gateway: infra.sms_gateway.clone(),
        id_generator: id_generator.clone(),
        clock: clock.clone(),
        settings: AccountSettings::default(),
    });
    let rooms = RoomService::new(RoomServiceDependencies {
        room_repository: infra.room_repository.clone(),
        id_generator,
        clock: clock.clone(),
        settings: RoomSettings {
            live_host: "live.example.com".to_string(),
            live_hub: "arena".to_string(),
            max_rooms,
        },
    });

    TestApp {
        store,
        sms,
        clock,
        accounts,
        rooms,
    }
}

impl TestApp {
    /// 走完整的验证码登录流程
    pub async fn login(&self, phone: &str) -> AccountId {
        self.accounts.send_verification_code(phone).await.unwrap();
        let code = self.sms.last_code(phone).unwrap();
        self.accounts.login(phone, &code).await.unwrap().account.id
    }
}
