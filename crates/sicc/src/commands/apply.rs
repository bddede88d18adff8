//! Apply a learned pattern to a conversation.

use anyhow::Result;
use colored::Colorize;
use serde_json::json;

use super::{open_service, print_json};
use crate::config::Config;

pub async fn execute(
    conversation_id: &str,
    pattern_id: &str,
    sender: Option<&str>,
    message: Option<&str>,
    json: bool,
    config: &Config,
) -> Result<()> {
    let mut context = json!({});
    if let Some(sender) = sender {
        context["sender_name"] = json!(sender);
    }
    if let Some(message) = message {
        context["current_message"] = json!(message);
    }

    let service = open_service(config).await?;
    let application = service
        .apply_pattern(conversation_id, pattern_id, &context)
        .await?;

    if json {
        return print_json(&application);
    }

    match &application.response {
        Some(response) if application.success => {
            println!("{} {}", "→".cyan(), response.response_text);
            println!(
                "  {}",
                format!(
                    "confidence {:.2}, adapted by LLM: {}",
                    response.confidence, response.adapted_by_llm
                )
                .dimmed()
            );
        }
        _ => {
            println!(
                "{} {}",
                "✗".red(),
                application
                    .reason
                    .as_deref()
                    .unwrap_or("pattern could not be applied")
            );
        }
    }
    Ok(())
}
