#[cfg(feature = "server")]
use postroom::server::StartupError;
#[cfg(feature = "server")]
use std::process::ExitCode;

#[cfg(feature = "server")]
#[tokio::main]
async fn main() -> ExitCode {
    match postroom::server::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "postroom-server exiting");
            let code = e
                .downcast_ref::<StartupError>()
                .map(StartupError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}
