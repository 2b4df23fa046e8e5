pub mod backup;
pub mod restore;
pub mod status;
pub mod verify;
