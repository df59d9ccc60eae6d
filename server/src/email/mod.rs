pub mod client;
pub mod parsed_message;
