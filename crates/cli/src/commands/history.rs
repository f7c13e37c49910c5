use otvet_core::config::{AppConfig, LoadOptions};
use otvet_core::domain::dialog::DialogRecord;
use otvet_db::{connect, SqlConversationStore};

use crate::commands::CommandResult;

pub fn run(conversation_id: &str, limit: usize, json_output: bool) -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "history",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "history",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let pool = connect(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let store = SqlConversationStore::new(pool.clone());
        let records = store
            .dialog_history(conversation_id, limit)
            .await
            .map_err(|error| ("db_query", error.to_string(), 4u8))?;
        pool.close().await;
        Ok::<Vec<DialogRecord>, (&'static str, String, u8)>(records)
    });

    match result {
        Ok(records) if json_output => match serde_json::to_string_pretty(&records) {
            Ok(output) => CommandResult { exit_code: 0, output },
            Err(error) => {
                CommandResult::failure("history", "serialization", error.to_string(), 3)
            }
        },
        Ok(records) => CommandResult { exit_code: 0, output: render_human(conversation_id, &records) },
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("history", error_class, message, exit_code)
        }
    }
}

fn render_human(conversation_id: &str, records: &[DialogRecord]) -> String {
    if records.is_empty() {
        return format!("no dialog records for conversation {conversation_id}");
    }

    let mut lines = vec![format!("{} dialog record(s), newest first:", records.len())];
    for record in records {
        let item = record.product_id.as_deref().unwrap_or("-");
        lines.push(format!(
            "[{}] {} item={}",
            record.created_at.to_rfc3339(),
            record.status.as_str(),
            item
        ));
        lines.push(format!("  Q: {}", record.question));
        lines.push(format!("  A: {}", record.answer));
        if !record.sources.is_empty() {
            let sources: Vec<&str> = record.sources.iter().map(String::as_str).collect();
            lines.push(format!("  sources: {}", sources.join(", ")));
        }
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use chrono::{TimeZone, Utc};
    use otvet_core::domain::dialog::{DialogRecord, ReplyStatus};

    use super::render_human;

    #[test]
    fn empty_history_renders_a_notice() {
        assert_eq!(
            render_human("chat-1", &[]),
            "no dialog records for conversation chat-1"
        );
    }

    #[test]
    fn records_render_with_status_item_and_sources() {
        let record = DialogRecord {
            conversation_id: "chat-1".to_string(),
            product_id: Some("12345".to_string()),
            question: "Какая цена?".to_string(),
            answer: "Цена 120000 руб".to_string(),
            status: ReplyStatus::Answered,
            sources: BTreeSet::from(["item_12345.txt".to_string()]),
            created_at: Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0).single().expect("timestamp"),
        };

        let output = render_human("chat-1", &[record]);

        assert!(output.contains("1 dialog record(s), newest first:"));
        assert!(output.contains("ANSWERED item=12345"));
        assert!(output.contains("  Q: Какая цена?"));
        assert!(output.contains("  sources: item_12345.txt"));
    }
}
