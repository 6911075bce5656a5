use balansir_dash_core::{
    BalansirClient, DashError, Dashboard, DashboardSettings, IngestSettings, Ingestion, LogTag,
    MetricsApi, RetryConfig,
};
use std::rc::Rc;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn sample_json(ts: i64, rt: f64) -> String {
    format!(
        r#"{{"timestamp": {ts}, "average_response_time": {rt}, "requests_per_second": 3,
            "memory_usage": 64, "errors_count": 0, "status_codes": {{"200": 5}},
            "endpoints": [{{"url": "http://10.0.0.1:8080", "active": true}}],
            "http_port": 80}}"#
    )
}

fn client(server: &MockServer) -> BalansirClient {
    BalansirClient::new(format!("{}/balansir", server.uri())).unwrap()
}

fn ingestion(server: &MockServer) -> Rc<Ingestion> {
    let dashboard = Rc::new(Dashboard::new(DashboardSettings::default()));
    let settings = IngestSettings {
        poll_interval: Duration::from_millis(50),
        bulk_retry: RetryConfig {
            jitter: false,
            ..RetryConfig::for_bulk_load(3, Duration::from_millis(5))
        },
        ..IngestSettings::default()
    };
    Rc::new(Ingestion::new(dashboard, Rc::new(client(server)), settings))
}

mod client_tests {
    use super::*;

    #[tokio::test]
    async fn test_fetch_stats() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/balansir/metrics/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sample_json(1_000, 12.5)))
            .mount(&server)
            .await;

        let sample = client(&server).fetch_stats().await.unwrap();
        assert_eq!(sample.timestamp, 1_000);
        assert_eq!(sample.average_response_time, 12.5);
        assert_eq!(sample.status_codes.get("200"), Some(&5));
    }

    #[tokio::test]
    async fn test_fetch_collected_stats_ndjson() {
        let server = MockServer::start().await;
        let body = format!("{}\n{}\n", sample_json(1_000, 1.0), sample_json(2_000, 2.0));
        Mock::given(method("GET"))
            .and(path("/balansir/metrics/collected_stats"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(&server)
            .await;

        let samples = client(&server).fetch_collected_stats().await.unwrap();
        assert_eq!(samples.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_collected_logs_accepts_created() {
        let server = MockServer::start().await;
        let body = r#"[{"timestamp": "2024-01-15T10:00:00Z", "tag": "WARNING ", "text": "slow upstream"}]"#;
        Mock::given(method("GET"))
            .and(path("/balansir/logs/collected_logs"))
            .respond_with(ResponseTemplate::new(201).set_body_string(body))
            .mount(&server)
            .await;

        let logs = client(&server).fetch_collected_logs().await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].tag, LogTag::Warning);
    }

    #[tokio::test]
    async fn test_bad_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/balansir/metrics/stats"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client(&server).fetch_stats().await.unwrap_err();
        match &err {
            DashError::BadStatus { endpoint, status } => {
                assert_eq!(endpoint, "/metrics/stats");
                assert_eq!(*status, 503);
            }
            other => panic!("expected bad status, got {other:?}"),
        }
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_missing_endpoint_is_permanent() {
        let server = MockServer::start().await;
        let err = client(&server).fetch_collected_stats().await.unwrap_err();
        assert_eq!(err.error_code(), "E1002");
        assert!(!err.is_transient());
    }
}

mod pipeline_tests {
    use super::*;

    #[tokio::test]
    async fn test_bulk_load_retries_torn_read() {
        let server = MockServer::start().await;
        let torn = format!("{}\n{{\"timestamp\": 2000, \"avera", sample_json(1_000, 1.0));
        Mock::given(method("GET"))
            .and(path("/balansir/metrics/collected_stats"))
            .respond_with(ResponseTemplate::new(200).set_body_string(torn))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/balansir/metrics/collected_stats"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "[{}, {}]",
                sample_json(1_000, 1.0),
                sample_json(2_000, 2.0)
            )))
            .mount(&server)
            .await;

        let ingestion = ingestion(&server);
        assert_eq!(ingestion.bulk_load().await.unwrap(), 2);
        assert_eq!(ingestion.dashboard().samples.get().len(), 2);
    }

    #[tokio::test]
    async fn test_bulk_load_gives_up_and_keeps_history() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/balansir/metrics/collected_stats"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{\"timestamp\": 1"))
            .expect(3)
            .mount(&server)
            .await;

        let ingestion = ingestion(&server);
        let err = ingestion.bulk_load().await.unwrap_err();
        assert_eq!(err.error_code(), "E3002");
        assert!(ingestion.dashboard().samples.get().is_empty());
    }

    #[tokio::test]
    async fn test_run_bulk_loads_then_polls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/balansir/metrics/collected_stats"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(format!("[{}]", sample_json(0, 10.0))),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/balansir/metrics/stats"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string(sample_json(60_000, 20.0)),
            )
            .mount(&server)
            .await;

        let ingestion = ingestion(&server);
        let local = tokio::task::LocalSet::new();
        local.run_until(ingestion.run(Some(2))).await;

        let dashboard = ingestion.dashboard();
        // both polls return the same timestamp, the second is a no-op
        assert_eq!(
            dashboard.samples.get().timestamps().collect::<Vec<_>>(),
            vec![0, 60_000]
        );
        assert_eq!(dashboard.aggregates.get().average, Some(15.0));
    }

    #[tokio::test]
    async fn test_failed_polls_do_not_stop_polling() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/balansir/metrics/collected_stats"))
            .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/balansir/metrics/stats"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/balansir/metrics/stats"))
            .respond_with(ResponseTemplate::new(200).set_body_string(sample_json(5_000, 1.0)))
            .mount(&server)
            .await;

        let ingestion = ingestion(&server);
        let local = tokio::task::LocalSet::new();
        local.run_until(ingestion.run(Some(3))).await;

        assert_eq!(ingestion.dashboard().samples.get().len(), 1);
    }

    #[tokio::test]
    async fn test_load_logs_into_view() {
        let server = MockServer::start().await;
        let body = r#"[
            {"timestamp": 1, "tag": "INFO", "text": "listening on :80"},
            {"timestamp": 2, "tag": "ERROR", "text": "backend 10.0.0.2 unreachable"}
        ]"#;
        Mock::given(method("GET"))
            .and(path("/balansir/logs/collected_logs"))
            .respond_with(ResponseTemplate::new(201).set_body_string(body))
            .mount(&server)
            .await;

        let ingestion = ingestion(&server);
        ingestion.dashboard().toggle_tag(LogTag::Info);
        assert_eq!(ingestion.load_logs().await.unwrap(), 2);

        let view = ingestion.dashboard().visible_logs.get();
        assert_eq!(view.records.len(), 1);
        assert_eq!(view.records[0].tag, LogTag::Error);
    }

    #[tokio::test]
    async fn test_follow_logs_reloads_view() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/balansir/logs/collected_logs"))
            .respond_with(ResponseTemplate::new(201).set_body_string(
                r#"[{"timestamp": 1, "tag": "ERROR", "text": "backend 10.0.0.2 unreachable"}]"#,
            ))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/balansir/logs/collected_logs"))
            .respond_with(ResponseTemplate::new(201).set_body_string(
                r#"[
                    {"timestamp": 1, "tag": "ERROR", "text": "backend 10.0.0.2 unreachable"},
                    {"timestamp": 2, "tag": "INFO", "text": "backend 10.0.0.2 back"},
                    {"timestamp": 3, "tag": "ERROR", "text": "backend 10.0.0.3 unreachable"}
                ]"#,
            ))
            .mount(&server)
            .await;

        let ingestion = ingestion(&server);
        let dashboard = ingestion.dashboard();
        dashboard.search_logs("unreachable");

        ingestion.follow_logs(Some(1)).await;

        assert_eq!(dashboard.logs.get().len(), 3);
        let view = dashboard.visible_logs.get();
        assert_eq!(
            view.records.iter().map(|r| r.timestamp).collect::<Vec<_>>(),
            vec![1, 3]
        );
    }
}
