use agenda_db::{connect_with_settings, migrations, ping};

use crate::commands::{prepare, CommandResult};

/// Preflight for `agenda-server`: config, database reachability, schema state.
pub fn run() -> CommandResult {
    let (config, runtime) = match prepare("start") {
        Ok(prepared) => prepared,
        Err(failure) => return failure,
    };

    let result = runtime.block_on(async {
        let pool = connect_with_settings(
            &config.database.url,
            config.database.max_connections,
            config.database.timeout_secs,
        )
        .await
        .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        ping(&pool).await.map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        let version = migrations::current_version(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        pool.close().await;
        Ok::<Option<i64>, (&'static str, String, u8)>(version)
    });

    let schema = match result {
        Ok(Some(version)) => format!("schema version {version}"),
        Ok(None) => "schema not migrated yet (applied on server start)".to_string(),
        Err((error_class, message, exit_code)) => {
            return CommandResult::failure("start", error_class, message, exit_code);
        }
    };

    CommandResult::success(
        "start",
        format!(
            "preflight passed: {schema}; server will listen on {}:{} \
             ({} enforcement, {} mail)",
            config.server.bind_address,
            config.server.port,
            config.workflow.enforcement.as_str(),
            config.mail.transport.as_str(),
        ),
    )
}
