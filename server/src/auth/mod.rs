pub mod gmail_token;
pub mod jwt;
