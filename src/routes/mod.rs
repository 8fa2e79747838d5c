mod auth;
mod health_check;
mod users;

pub use auth::{
    change_password, get_current_user, login, logout, refresh, register, ChangePasswordRequest,
    LoginRequest, RefreshRequest, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE,
};
pub use health_check::health_check;
pub use users::{update_avatar, update_cover_image, update_profile, UpdateProfileRequest};
