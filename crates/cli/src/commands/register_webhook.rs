use crate::commands::CommandResult;
use otvet_avito::MessengerClient;
use otvet_core::config::{AppConfig, LoadOptions};

pub fn run() -> CommandResult {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "register-webhook",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let webhook_url = format!(
        "{}/avito/webhook",
        config.responder.app_base_url.trim_end_matches('/')
    );

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "register-webhook",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let client = MessengerClient::new(&config.avito)
            .map_err(|error| ("client_init", error.to_string(), 4u8))?;
        client
            .register_webhook(&webhook_url)
            .await
            .map_err(|error| ("webhook_registration", error.to_string(), 5u8))?;
        Ok::<(), (&'static str, String, u8)>(())
    });

    match result {
        Ok(()) => CommandResult::success(
            "register-webhook",
            format!("webhook subscription points at {webhook_url}"),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("register-webhook", error_class, message, exit_code)
        }
    }
}
