use officeflow_core::config::{AppConfig, LoadOptions};
use officeflow_core::domain::directory::UserId;
use officeflow_core::tokens::TokenService;

use crate::commands::CommandResult;

/// Issues a bearer token for `user_id`. The token is the command message.
pub fn run(user_id: i64, roles: &[String]) -> CommandResult {
    if user_id <= 0 {
        return CommandResult::failure(
            "token",
            "invalid_input",
            "--user must be a positive user id",
            2,
        );
    }

    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure(
                "token",
                "config_validation",
                format!("configuration issue: {error}"),
                2,
            );
        }
    };

    let roles: Vec<String> = roles
        .iter()
        .map(|role| role.trim().to_ascii_lowercase())
        .filter(|role| !role.is_empty())
        .collect();

    match TokenService::from_config(&config.jwt).issue(UserId(user_id), &roles) {
        Ok(token) => CommandResult::success("token", token),
        Err(error) => CommandResult::failure("token", "token_issue", error.to_string(), 4),
    }
}
