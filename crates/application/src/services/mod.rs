mod account_service;
mod room_service;


pub use account_service::{
    AccountService, AccountServiceDependencies, AccountSettings, LoginOutcome,
};
pub use room_service::{ensure_in_pk, RoomService, RoomServiceDependencies, RoomSettings};
