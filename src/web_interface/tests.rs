#[cfg(test)]
mod tests {
    use std::fs;
    use std::sync::Arc;

    use serde_json::{json, Value};
    use tempfile::TempDir;
    use warp::http::StatusCode;

    use crate::clock::{parse_timestamp, FixedClock};
    use crate::configuration::Config;
    use crate::session_management::SessionManager;
    use crate::storage::types::{ActiveSessionRecord, SessionTable};
    use crate::storage::{FileStorage, Storage};
    use crate::web_interface::api_routes;

    const NOW: &str = "2024-01-02 12:00:00";

    struct Fixture {
        _dir: TempDir,
        config: Config,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let mut config = Config::with_data_dir(dir.path());
        config.status_log = dir.path().join("status.log");
        config.server_status = dir.path().join("server_status.json");
        Fixture { _dir: dir, config }
    }

    fn write_status(config: &Config, rows: &[&str], routes: &[&str]) {
        let mut text = String::from("Common Name,Real Address,Bytes Received,Bytes Sent,Connected Since\n");
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        text.push_str("ROUTING TABLE\n");
        for route in routes {
            text.push_str(route);
            text.push('\n');
        }
        text.push_str("GLOBAL STATS\n");
        fs::write(&config.status_log, text).unwrap();
    }

    struct Served {
        status: StatusCode,
        body: Vec<u8>,
    }

    impl Served {
        fn json(&self) -> Value {
            serde_json::from_slice(&self.body).unwrap()
        }
    }

    async fn get(config: &Config, path: &str) -> Served {
        let clock = FixedClock(parse_timestamp(NOW).unwrap());
        let manager = Arc::new(SessionManager::new(
            config,
            Arc::new(FileStorage::new(config)),
            Arc::new(clock),
        ));
        let routes = api_routes(manager, config.server_status.clone());
        let response = warp::test::request().method("GET").path(path).reply(&routes).await;
        Served {
            status: response.status(),
            body: response.body().to_vec(),
        }
    }

    fn event(name: &str, ip: &str, session_id: &str, timestamp: &str, end: &str) -> Value {
        json!({
            "timestamp": timestamp,
            "name": name,
            "ip": ip,
            "session_id": session_id,
            "rx": 1.0,
            "tx": 2.0,
            "vpn_ip": "10.8.0.5",
            "vpn_ipv4": "10.8.0.5",
            "vpn_ipv6": "",
            "port": "443",
            "session_end": end,
        })
    }

    #[tokio::test]
    async fn test_dashboard_is_served() {
        let f = fixture();
        let response = get(&f.config, "/").await;
        assert_eq!(response.status, StatusCode::OK);
        assert!(String::from_utf8_lossy(&response.body).contains("OpenVPN Monitor"));
    }

    #[tokio::test]
    async fn test_clients_runs_a_cycle() {
        let f = fixture();
        write_status(
            &f.config,
            &["alice,198.51.100.20:51820,2048,1024,2024-01-02 11:00:00"],
            &["10.8.0.6,alice"],
        );

        let response = get(&f.config, "/api/clients").await;

        assert_eq!(response.status, StatusCode::OK);
        let payload = response.json();
        assert_eq!(payload["clients"][0]["common_name"], "alice");
        assert_eq!(payload["clients"][0]["vpn_ip"], "10.8.0.6");
        assert_eq!(payload["clients"][0]["time_online"], "1:00:00");
        assert!(FileStorage::new(&f.config).load_sessions().contains_key("alice"));
    }

    #[tokio::test]
    async fn test_clients_falls_back_to_persisted_table() {
        let f = fixture();
        let mut table = SessionTable::new();
        table.insert(
            "alice".into(),
            ActiveSessionRecord {
                ip: "198.51.100.10".into(),
                vpn_ip: "10.8.0.5".into(),
                vpn_ipv4: "10.8.0.5".into(),
                vpn_ipv6: "".into(),
                connected_at: parse_timestamp("2024-01-02 09:00:00").unwrap(),
                bytes_received: 1,
                bytes_sent: 2,
                port: "443".into(),
                session_id: "existing-session".into(),
            },
        );
        FileStorage::new(&f.config).save_sessions(&table).unwrap();

        let response = get(&f.config, "/api/clients").await;

        assert_eq!(response.status, StatusCode::OK);
        let payload = response.json();
        assert_eq!(payload["clients"].as_array().unwrap().len(), 1);
        assert_eq!(payload["clients"][0]["common_name"], "alice");
        assert_eq!(payload["clients"][0]["time_online"], "3:00:00");
    }

    #[tokio::test]
    async fn test_history_backfills_geo_store() {
        let f = fixture();
        let journal = json!([
            event("alice", "198.51.100.10", "s1", "2024-01-01 09:00:00", "2024-01-01 10:00:00"),
            event("alice", "198.51.100.10", "s2", "2024-01-03 09:00:00", "2024-01-03 11:00:00"),
            {
                "timestamp": "2024-01-02 09:00:00",
                "name": "bob",
                "ip": "203.0.113.5",
                "session_id": "s3",
                "rx": 3.0,
                "tx": 4.0,
                "vpn_ip": "10.9.0.2",
                "vpn_ipv4": "10.9.0.2",
                "vpn_ipv6": "2001:db8::abcd",
                "port": "1194",
                "session_end": "2024-01-02 11:00:00",
            },
        ]);
        fs::write(&f.config.history_log, journal.to_string()).unwrap();
        assert!(!f.config.client_geo_db.exists());

        let response = get(&f.config, "/api/history").await;

        assert_eq!(response.status, StatusCode::OK);
        let entries = response.json();
        assert_eq!(entries.as_array().unwrap().len(), 3);
        assert_eq!(entries[0]["duration"], "1:00:00");
        assert_eq!(entries[2]["vpn_ipv6"], "2001:db8::abcd");

        let geo: Value = serde_json::from_str(&fs::read_to_string(&f.config.client_geo_db).unwrap()).unwrap();
        let alice = &geo["clients"]["alice"];
        assert_eq!(alice["first_seen"], "2024-01-01 09:00:00");
        assert_eq!(alice["last_seen"], "2024-01-03 09:00:00");
        let alice_ip = &alice["ips"]["198.51.100.10"];
        assert_eq!(alice_ip["vpn_ipv4"], json!(["10.8.0.5"]));
        assert_eq!(alice_ip["vpn_ipv6"], json!([]));
        assert_eq!(
            alice_ip["location"],
            json!({"latitude": null, "longitude": null, "city": "", "country": ""})
        );
        let bob = &geo["clients"]["bob"];
        assert_eq!(bob["first_seen"], "2024-01-02 09:00:00");
        assert_eq!(bob["ips"]["203.0.113.5"]["vpn_ipv6"], json!(["2001:db8::abcd"]));
    }

    #[tokio::test]
    async fn test_history_read_failure_is_a_json_error() {
        let f = fixture();
        fs::write(&f.config.history_log, "[{\"timestamp\": ").unwrap();

        let response = get(&f.config, "/api/history").await;

        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.json(),
            json!({"error": {"code": "storage_error", "message": "Failed to read history log"}})
        );
    }

    #[tokio::test]
    async fn test_summary_counts_closed_sessions() {
        let f = fixture();
        let mut open = event("alice", "198.51.100.10", "s1", "2024-01-01 09:00:00", "");
        open["rx"] = Value::Null;
        open["tx"] = Value::Null;
        open["session_end"] = Value::Null;
        let journal = json!([
            open,
            event("alice", "198.51.100.10", "s1", "2024-01-01 09:00:00", "2024-01-01 10:00:00"),
            event("alice", "198.51.100.10", "s2", "2024-01-02 11:00:00", "2024-01-02 12:00:00"),
        ]);
        fs::write(&f.config.history_log, journal.to_string()).unwrap();
        write_status(&f.config, &[], &[]);

        let response = get(&f.config, "/api/clients/summary").await;

        assert_eq!(response.status, StatusCode::OK);
        let payload = response.json();
        assert_eq!(payload["clients"][0]["name"], "alice");
        assert_eq!(payload["clients"][0]["sessions"], 2);
        assert_eq!(payload["clients"][0]["open_sessions"], 0);
        assert_eq!(payload["clients"][0]["is_online"], false);
    }

    #[tokio::test]
    async fn test_summary_includes_live_session() {
        let f = fixture();
        let journal = json!([event(
            "alice",
            "198.51.100.10",
            "s1",
            "2024-01-01 09:00:00",
            "2024-01-01 10:00:00"
        )]);
        fs::write(&f.config.history_log, journal.to_string()).unwrap();
        write_status(
            &f.config,
            &["alice,198.51.100.10:443,1024,2048,2024-01-02 09:00:00"],
            &["10.8.0.5,alice"],
        );

        let response = get(&f.config, "/api/clients/summary").await;

        assert_eq!(response.status, StatusCode::OK);
        let payload = response.json();
        assert_eq!(payload["clients"][0]["sessions"], 2);
        assert_eq!(payload["clients"][0]["is_online"], true);
    }

    #[tokio::test]
    async fn test_server_status_reports_live_totals() {
        let f = fixture();
        fs::write(&f.config.server_status, r#"{"status": "Online", "pingable": "yes"}"#).unwrap();
        write_status(
            &f.config,
            &["alice,198.51.100.20:51820,1048576,524288,2024-01-02 11:00:00"],
            &[],
        );

        let response = get(&f.config, "/api/server-status").await;

        assert_eq!(response.status, StatusCode::OK);
        let payload = response.json();
        assert_eq!(payload["status"], "Online");
        assert_eq!(payload["pingable"], true);
        assert_eq!(payload["mode"], "server");
        assert_eq!(payload["clients"], 1);
        assert_eq!(payload["total_rx"], 1.0);
        assert_eq!(payload["total_tx"], 0.5);
    }

    #[tokio::test]
    async fn test_unknown_path_is_rejected() {
        let f = fixture();
        let response = get(&f.config, "/api/nothing").await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }
}
