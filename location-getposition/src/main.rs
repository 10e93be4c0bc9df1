//! Print the current position as one JSON line and exit
//!
//! Exit status identifies the failing stage: `-1` to `-7` for the handshake
//! steps in order, `-8` on timeout, `-9` when GeoClue2 disables the client
//! and `-10` when the location object cannot be read.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use location_provider::{
    AccuracyLevel, GeoClueProvider, HandshakeStep, LocationFix, Provider, SessionError,
};
use location_service::handlers;
use location_service::logging::{self, LoggingMode};
use location_service::payload::{self, PositionReply};
use location_service::ServiceError;
use tracing::error;

/// Query GeoClue2 once and print the position as JSON
#[derive(Parser, Debug)]
#[command(name = "location-getposition")]
#[command(version)]
pub struct Args {
    /// Exit after T seconds without a fix
    #[arg(short, long, value_name = "T", default_value = "30")]
    pub timeout: u64,

    /// Request accuracy level A: country = 1, city = 4, neighborhood = 5, street = 6, exact = 8
    #[arg(short, long, value_name = "A", default_value = "1", value_parser = parse_accuracy)]
    pub accuracy_level: AccuracyLevel,

    /// Desktop id presented to GeoClue2
    #[arg(long, default_value = "location-getposition")]
    pub desktop_id: String,

    /// Log handshake progress to stderr
    #[arg(short, long)]
    pub verbose: bool,
}

fn parse_accuracy(value: &str) -> Result<AccuracyLevel, String> {
    let raw: u32 = value.parse().map_err(|e| format!("{}", e))?;
    AccuracyLevel::try_from(raw).map_err(|e| e.to_string())
}

#[derive(Debug, thiserror::Error)]
pub enum GetPositionError {
    #[error("No position fix within {0} seconds")]
    Timeout(u64),

    #[error(transparent)]
    Service(#[from] ServiceError),
}

impl GetPositionError {
    /// Signed process exit status
    pub fn exit_code(&self) -> i32 {
        match self {
            GetPositionError::Timeout(_) => -8,
            GetPositionError::Service(ServiceError::Session(SessionError::Handshake {
                step,
                ..
            })) => step_exit_code(*step),
            GetPositionError::Service(ServiceError::SessionLost) => -9,
            GetPositionError::Service(ServiceError::Session(SessionError::LocationRead {
                ..
            })) => -10,
            GetPositionError::Service(_) => 1,
        }
    }
}

fn step_exit_code(step: HandshakeStep) -> i32 {
    match step {
        HandshakeStep::ManagerConnect => -1,
        HandshakeStep::GetClient => -2,
        HandshakeStep::ClientPropertiesConnect => -3,
        HandshakeStep::SetDesktopId => -4,
        HandshakeStep::SetAccuracyLevel => -5,
        HandshakeStep::ClientConnect => -6,
        HandshakeStep::Start => -7,
    }
}

/// Open a session, wait for the first fix and stop again
///
/// `Stop` failures on the way out are ignored.
pub async fn run<P: Provider>(provider: Arc<P>, args: &Args) -> Result<LocationFix, GetPositionError> {
    handlers::get_current_position(
        provider,
        &args.desktop_id,
        args.accuracy_level,
        Duration::from_secs(args.timeout),
    )
    .await?
    .ok_or(GetPositionError::Timeout(args.timeout))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let mode = if args.verbose {
        LoggingMode::Debug
    } else {
        LoggingMode::Standard
    };
    let logging_result = match mode {
        LoggingMode::Standard => logging::init_with_default("warn"),
        mode => logging::init_logging(mode),
    };
    if let Err(e) = logging_result {
        eprintln!("{}", e);
    }

    match run(Arc::new(GeoClueProvider::new()), &args).await {
        Ok(fix) => {
            println!("{}", payload::encode(&PositionReply::from(&fix)));
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use location_provider::mock::MockProvider;
    use location_provider::RawLocation;
    use rstest::rstest;

    fn args(timeout: u64) -> Args {
        Args {
            timeout,
            accuracy_level: AccuracyLevel::Country,
            desktop_id: "location-getposition".to_string(),
            verbose: false,
        }
    }

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["location-getposition"]).unwrap();
        assert_eq!(args.timeout, 30);
        assert_eq!(args.accuracy_level, AccuracyLevel::Country);
        assert_eq!(args.desktop_id, "location-getposition");
    }

    #[test]
    fn test_accuracy_level_is_validated() {
        let args = Args::try_parse_from(["location-getposition", "-a", "8", "-t", "5"]).unwrap();
        assert_eq!(args.accuracy_level, AccuracyLevel::Exact);
        assert_eq!(args.timeout, 5);

        assert!(Args::try_parse_from(["location-getposition", "-a", "3"]).is_err());
        assert!(Args::try_parse_from(["location-getposition", "-a", "exact"]).is_err());
    }

    #[tokio::test]
    async fn test_fix_is_printed_shape() {
        let provider = MockProvider::new();
        provider.emit_on_start(RawLocation {
            latitude: 37.39,
            longitude: -122.04,
            accuracy: 20.0,
            altitude: 12.5,
        });

        let fix = run(Arc::new(provider.clone()), &args(30)).await.unwrap();
        let reply: serde_json::Value =
            serde_json::from_str(&payload::encode(&PositionReply::from(&fix))).unwrap();

        assert_eq!(reply["latitude"], 37.39);
        assert_eq!(reply["altitude"], 12.5);
        assert_eq!(provider.desktop_ids(), vec!["location-getposition".to_string()]);
        assert_eq!(provider.accuracy_levels(), vec![AccuracyLevel::Country]);
        assert_eq!(provider.stops(), 1);
    }

    #[rstest]
    #[case(HandshakeStep::ManagerConnect, -1)]
    #[case(HandshakeStep::GetClient, -2)]
    #[case(HandshakeStep::ClientPropertiesConnect, -3)]
    #[case(HandshakeStep::SetDesktopId, -4)]
    #[case(HandshakeStep::SetAccuracyLevel, -5)]
    #[case(HandshakeStep::ClientConnect, -6)]
    #[case(HandshakeStep::Start, -7)]
    #[tokio::test]
    async fn test_handshake_failure_exit_codes(#[case] step: HandshakeStep, #[case] code: i32) {
        let provider = MockProvider::new();
        provider.fail_at(step);

        let error = run(Arc::new(provider.clone()), &args(30)).await.unwrap_err();

        assert_eq!(error.exit_code(), code);
        assert_eq!(provider.live_handles(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_ignores_stop_failure() {
        let provider = MockProvider::new();
        provider.fail_stop(true);

        let error = run(Arc::new(provider.clone()), &args(3)).await.unwrap_err();

        assert!(matches!(error, GetPositionError::Timeout(3)));
        assert_eq!(error.exit_code(), -8);
        assert_eq!(provider.stops(), 1);
    }

    #[tokio::test]
    async fn test_disabled_geolocation_exit_code() {
        let provider = MockProvider::new();
        let shared = Arc::new(provider.clone());
        let cli_args = args(30);
        let task = tokio::spawn(async move { run(shared, &cli_args).await });

        while !provider.set_active(false) {
            tokio::task::yield_now().await;
        }

        let error = task.await.unwrap().unwrap_err();
        assert_eq!(error.exit_code(), -9);
    }

    #[tokio::test]
    async fn test_unreadable_location_exit_code() {
        let provider = MockProvider::new();
        let shared = Arc::new(provider.clone());
        let cli_args = args(30);
        let task = tokio::spawn(async move { run(shared, &cli_args).await });

        while !provider.emit_unreadable_location() {
            tokio::task::yield_now().await;
        }

        let error = task.await.unwrap().unwrap_err();
        assert_eq!(error.exit_code(), -10);
    }

    #[test]
    fn test_exit_status_wraps_to_unsigned() {
        assert_eq!(GetPositionError::Timeout(30).exit_code() as u8, 248);
        assert_eq!(step_exit_code(HandshakeStep::ManagerConnect) as u8, 255);
    }
}
