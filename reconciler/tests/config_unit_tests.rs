//! Configuration loading and command table tests

mod common;

use common::fixtures::*;
use reconciler::scheduler::{validate_6_field_cron, Cadence, OverlapPolicy};
use reconciler::{ConfigManager, CronCommand};
use rstest::rstest;
use std::time::Duration;

#[tokio::test]
async fn test_loads_config_directory() {
    let dir = TestConfigBuilder::new()
        .set("freeze_threshold = 3")
        .build();

    let manager = ConfigManager::new(&dir.path()).await.unwrap();
    let config = manager.get_current_config();
    assert_eq!(config.freeze_threshold, 3);
    assert_eq!(config.reservation_grace_minutes, 30);
    assert_eq!(config.mail.report_recipients, vec![emails::OPERATIONS.to_string()]);
    assert!(config.gateway.api_key.is_empty());
}

#[tokio::test]
async fn test_secrets_file_provides_gateway_key() {
    let dir = TestConfigBuilder::new()
        .secrets("gateway_api_key = \"clave-secreta\"\n")
        .build();

    let config = ConfigManager::new(&dir.path())
        .await
        .unwrap()
        .get_current_config();
    // PAYMENT_GATEWAY_API_KEY would take precedence; it is not set in tests
    if std::env::var("PAYMENT_GATEWAY_API_KEY").is_err() {
        assert_eq!(config.gateway.api_key, "clave-secreta");
    }
}

#[tokio::test]
async fn test_missing_main_toml_fails() {
    let dir = tempfile::TempDir::new().unwrap();
    let result = ConfigManager::new(dir.path().to_str().unwrap()).await;
    let err = result.err().expect("Loading must fail").to_string();
    assert!(err.contains("main.toml"));
}

#[tokio::test]
async fn test_invalid_values_are_rejected() {
    let dir = TestConfigBuilder::new().timezone("Bogota/Centro").build();
    assert!(ConfigManager::new(&dir.path()).await.is_err());

    let dir = TestConfigBuilder::new()
        .set("gateway_concurrency = 64")
        .build();
    assert!(ConfigManager::new(&dir.path()).await.is_err());

    let dir = TestConfigBuilder::new()
        .extra("[jobs.confirmar-pagos]\ncadence = \"cada rato\"\n")
        .build();
    let err = ConfigManager::new(&dir.path()).await.err().unwrap().to_string();
    assert!(err.contains("jobs.confirmar-pagos.cadence"));
}

#[tokio::test]
async fn test_job_overrides_reach_the_command_table() {
    let dir = TestConfigBuilder::new()
        .extra(
            "[jobs.\"cron:confirmar-pagos\"]\ncadence = \"cron 30 */2 * * * *\"\noverlap = \"allow\"\nmax_run_seconds = 90\n\n[jobs.reportar-reservas-mensualidades]\nenabled = false\n",
        )
        .build();

    let config = ConfigManager::new(&dir.path())
        .await
        .unwrap()
        .get_current_config();
    let table = config.job_table().unwrap();

    let confirm = table
        .iter()
        .find(|job| job.command == CronCommand::ConfirmarPagos)
        .unwrap();
    assert_eq!(confirm.cadence.to_cron(), "30 */2 * * * *");
    assert_eq!(confirm.overlap, OverlapPolicy::Allow);
    assert_eq!(confirm.max_run, Duration::from_secs(90));

    let report = table
        .iter()
        .find(|job| job.command == CronCommand::ReportarReservasMensualidades)
        .unwrap();
    assert!(!report.enabled);

    let reaper = table
        .iter()
        .find(|job| job.command == CronCommand::ReservasSinPago)
        .unwrap();
    assert_eq!(reaper.cadence, Cadence::EveryMinute);
    assert_eq!(reaper.overlap, OverlapPolicy::Skip);
}

#[rstest]
#[case("every_minute", "0 * * * * *")]
#[case("every_five_minutes", "0 */5 * * * *")]
#[case("hourly", "0 0 * * * *")]
#[case("daily 00:05", "0 5 0 * * *")]
#[case("monthly 1 07:00", "0 0 7 1 * *")]
#[case("cron 0 15 3 * * 1-5", "0 15 3 * * 1-5")]
fn test_cadence_translation(#[case] raw: &str, #[case] cron: &str) {
    let cadence: Cadence = raw.parse().unwrap();
    assert_eq!(cadence.to_cron(), cron);
    assert!(validate_6_field_cron(&cadence.to_cron()).is_ok());
    assert_eq!(cadence.to_string().parse::<Cadence>().unwrap(), cadence);
}

#[rstest]
#[case("weekly")]
#[case("daily 24:00")]
#[case("daily 7")]
#[case("monthly 31 07:00")]
#[case("cron * * * * *")]
#[case("cron 0 61 * * * *")]
fn test_invalid_cadences(#[case] raw: &str) {
    assert!(raw.parse::<Cadence>().is_err());
}

#[rstest]
#[case("cron:reservas-sin-pago", CronCommand::ReservasSinPago)]
#[case("procesar-novedades", CronCommand::ProcesarNovedades)]
#[case("cron:confirmar-pagos", CronCommand::ConfirmarPagos)]
#[case("repetir-cancelaciones", CronCommand::RepetirCancelaciones)]
#[case("cron:reportar-reservas-mensualidades", CronCommand::ReportarReservasMensualidades)]
fn test_command_names(#[case] raw: &str, #[case] expected: CronCommand) {
    assert_eq!(raw.parse::<CronCommand>().unwrap(), expected);
}
