use std::env;

use crate::{
    email::client::GmailClient, rate_limiters::RateLimiters, server_config::cfg, HttpClient,
};

pub fn setup_http_client() -> HttpClient {
    dotenvy::dotenv().ok();
    reqwest::ClientBuilder::new()
        .use_rustls_tls()
        .build()
        .unwrap()
}

/// Client for the mailbox behind `GMAIL_ACCESS_TOKEN`
pub fn setup_gmail_client() -> GmailClient {
    let http_client = setup_http_client();
    let token = env::var("GMAIL_ACCESS_TOKEN").expect("GMAIL_ACCESS_TOKEN is not set in .env file");
    GmailClient::new(http_client, token, RateLimiters::from_env(), cfg.gmail.clone())
}
