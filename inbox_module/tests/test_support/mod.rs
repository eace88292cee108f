#![allow(dead_code)]

use inbox_module::inbox_store::{InboxStore, NewProfile};
use inbox_module::models::MailboxOwner;

pub fn require_supabase_db_url(test_name: &str) -> Option<String> {
    dotenvy::dotenv().ok();
    match std::env::var("SUPABASE_DB_URL") {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => {
            eprintln!("Skipping {test_name}; SUPABASE_DB_URL not set.");
            None
        }
    }
}

pub fn provision_support_mailbox(store: &dyn InboxStore) -> MailboxOwner {
    store
        .provision_mailbox(
            &NewProfile {
                full_name: Some("Acme Owner".to_string()),
                email: "owner@acme.com".to_string(),
            },
            "support",
            "acme.com",
        )
        .expect("provision mailbox")
}

pub fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port");
    listener.local_addr().expect("local addr").port()
}

pub fn inbound_payload(to: &str, message_id: &str, body: &str) -> serde_json::Value {
    serde_json::json!({
        "From": "jane@x.com",
        "FromName": "Jane Doe",
        "FromFull": { "Email": "jane@x.com", "Name": "Jane Doe", "MailboxHash": "" },
        "To": to,
        "Subject": "Pricing question",
        "TextBody": body,
        "HtmlBody": format!("<p>{body}</p>"),
        "MessageID": message_id,
        "Date": "Mon, 19 Oct 2026 09:00:00 +0000",
        "Headers": [
            { "Name": "Message-ID", "Value": format!("<{message_id}@mail.x.com>") }
        ],
        "Attachments": []
    })
}
