use std::sync::Arc;

use application::{
    AccountService, AccountServiceDependencies, AccountSettings, Clock, IdGenerator,
    RandomSource, RoomService, RoomServiceDependencies, RoomSettings,
};
use config::AppConfig;
use infrastructure::Infrastructure;

#[derive(Clone)]
pub struct AppState {
    pub account_service: Arc<AccountService>,
    pub room_service: Arc<RoomService>,
    /// 登录 cookie 的有效期
    pub session_ttl_secs: u64,
}

impl AppState {
    pub fn new(
        account_service: Arc<AccountService>,
        room_service: Arc<RoomService>,
        session_ttl_secs: u64,
    ) -> Self {
        Self {
            account_service,
            room_service,
            session_ttl_secs,
        }
    }

    /// 用配置和适配器组装两个服务
    pub fn build(
        config: &AppConfig,
        infra: Infrastructure,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
    ) -> Self {
        let id_generator = Arc::new(IdGenerator::new(random, config.ids.max_attempts));

        let account_service = AccountService::new(AccountServiceDependencies {
            account_repository: infra.account_repository,
            session_repository: infra.session_repository,
            code_repository: infra.code_repository,
            sms_gateway: infra.sms_gateway,
            id_generator: id_generator.clone(),
            clock: clock.clone(),
            settings: AccountSettings::from_config(&config.auth),
        });
        let room_service = RoomService::new(RoomServiceDependencies {
            room_repository: infra.room_repository,
            id_generator,
            clock,
            settings: RoomSettings::from_config(config),
        });

        Self::new(
            Arc::new(account_service),
            Arc::new(room_service),
            config.auth.session_ttl_secs,
        )
    }
}
