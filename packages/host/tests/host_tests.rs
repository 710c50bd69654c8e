#![allow(clippy::disallowed_methods)]

use std::error::Error;
use std::process::{Command, Stdio};
use std::time::Duration;

use host::{HostConfig, HostError, TERMINATION_MESSAGE};

fn memory_config(port: u16) -> String {
    format!(
        r#"
        [cluster]
        cluster_id = "test"
        service_id = "host"

        [storage]
        provider = "memory"

        [endpoint]
        port = {port}

        [health]
        enabled = false
        "#
    )
}

#[tokio::test]
async fn test_run_returns_ok_on_shutdown() -> Result<(), Box<dyn Error>> {
    let config = HostConfig::from_toml(&memory_config(25001))?;
    let shutdown = tokio::time::sleep(Duration::from_millis(200));

    host::run(config, shutdown).await?;
    Ok(())
}

#[tokio::test]
async fn test_run_fails_on_unusable_storage() -> Result<(), Box<dyn Error>> {
    let config = HostConfig::from_toml(
        r#"
        [cluster]
        cluster_id = "test"

        [storage]
        provider = "object_store"
        "#,
    )?;

    let result = host::run(config, std::future::pending()).await;
    assert!(matches!(result, Err(HostError::InvalidConfig(_))), "got {result:?}");
    Ok(())
}

#[tokio::test]
async fn test_file_provider_creates_state_dir() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let state_dir = dir.path().join("state");
    let config = HostConfig::from_toml(&format!(
        r#"
        [cluster]
        cluster_id = "test"

        [storage]
        provider = "file"
        connection = "{}"

        [endpoint]
        port = 25003

        [health]
        enabled = false
        "#,
        state_dir.display()
    ))?;

    host::run(config, tokio::time::sleep(Duration::from_millis(100))).await?;
    assert!(state_dir.is_dir());
    Ok(())
}

// The only test in this binary that opens the global database
#[tokio::test]
async fn test_surrealdb_provider_keeps_state_across_silos() -> Result<(), Box<dyn Error>> {
    use serde_json::json;
    use silo::GrainId;
    use silo_core::{Human, HumanInput};

    let toml = |port: u16| {
        format!(
            r#"
            [cluster]
            cluster_id = "test"

            [storage]
            provider = "surrealdb"

            [endpoint]
            port = {port}

            [health]
            enabled = false
            "#
        )
    };
    let counter = GrainId::new("counter", "durable");

    let config = HostConfig::from_toml(&toml(25006))?;
    let first = host::bootstrap::build(&config).await?.start().await?;
    assert_eq!(first.client().call(&counter, "add", json!(3)).await?, json!(3));
    let leia: Human = first
        .client()
        .invoke(
            &GrainId::new("human", "rebels"),
            "create",
            &HumanInput {
                name: "Leia".into(),
                home_planet: None,
                appears_in: vec![],
                friends: vec![],
            },
        )
        .await?;
    first.shutdown().await?;

    let config = HostConfig::from_toml(&toml(25007))?;
    let second = host::bootstrap::build(&config).await?.start().await?;
    let client = second.client();
    assert_eq!(client.call(&counter, "get", serde_json::Value::Null).await?, json!(3));
    let found: Vec<Human> = client
        .invoke(&GrainId::new("human", "rebels"), "get", &[leia.id.clone()])
        .await?;
    assert_eq!(found, vec![leia]);

    second.shutdown().await?;
    Ok(())
}

async fn exploding_bootstrap() -> Result<(), HostError> {
    panic!("bootstrap exploded")
}

#[test]
fn test_panics_in_run_become_errors() -> Result<(), Box<dyn Error>> {
    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let result = host::block_on_guarded(&runtime, exploding_bootstrap());
    let err = result.err().ok_or("panic escaped as success")?;
    assert!(format!("{err:#}").contains("bootstrap exploded"), "got {err:#}");

    let runtime = tokio::runtime::Builder::new_current_thread().enable_all().build()?;
    let result = host::block_on_guarded(&runtime, async {
        Err::<(), _>(HostError::InvalidConfig("no storage".into()))
    });
    let err = result.err().ok_or("error escaped as success")?;
    assert!(format!("{err:#}").contains("no storage"), "got {err:#}");
    Ok(())
}

#[test]
fn test_binary_exits_1_on_bad_config() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("silo.toml");
    std::fs::write(&path, "[cluster]\ncluster_id = \"test\"\n")?;

    let output = Command::new(env!("CARGO_BIN_EXE_silo-host"))
        .arg("--config")
        .arg(&path)
        .env("RUST_LOG", "info")
        .output()?;

    assert_eq!(output.status.code(), Some(1));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains(TERMINATION_MESSAGE), "stdout: {stdout}");
    Ok(())
}

#[test]
fn test_binary_exits_1_on_missing_config_file() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;

    let status = Command::new(env!("CARGO_BIN_EXE_silo-host"))
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .stdout(Stdio::null())
        .status()?;

    assert_eq!(status.code(), Some(1));
    Ok(())
}

#[cfg(unix)]
#[test]
fn test_binary_exits_0_on_sigterm() -> Result<(), Box<dyn Error>> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("silo.toml");
    std::fs::write(&path, memory_config(25004))?;

    let mut child = Command::new(env!("CARGO_BIN_EXE_silo-host"))
        .arg("--config")
        .arg(&path)
        .stdout(Stdio::null())
        .spawn()?;
    std::thread::sleep(Duration::from_secs(2));

    let killed = Command::new("kill")
        .arg("-TERM")
        .arg(child.id().to_string())
        .status()?;
    assert!(killed.success());

    let status = child.wait()?;
    assert_eq!(status.code(), Some(0));
    Ok(())
}

#[cfg(feature = "health")]
#[tokio::test]
async fn test_health_endpoint_reports_silo() -> Result<(), Box<dyn Error>> {
    use serde_json::{Value, json};
    use silo::{GrainId, SiloBuilder, SiloConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let silo = SiloBuilder::new(SiloConfig::default().with_endpoint("127.0.0.1", 25005))
        .with_default_grain::<host::grains::CounterGrain>()
        .start()
        .await?;
    silo.client()
        .call(&GrainId::new("counter", "h"), "add", json!(1))
        .await?;

    let server = host::health::HealthServer::spawn("127.0.0.1:0".parse()?, silo.monitor()).await?;

    let mut stream = tokio::net::TcpStream::connect(server.local_addr()).await?;
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await?;
    let mut response = String::new();
    stream.read_to_string(&mut response).await?;

    assert!(response.starts_with("HTTP/1.1 200"), "response: {response}");
    let body = response.split("\r\n\r\n").nth(1).ok_or("no body")?;
    let body: Value = serde_json::from_str(body)?;
    assert_eq!(body["status"], "active");
    assert_eq!(body["silo"], silo.address().to_string());
    assert_eq!(body["active_grains"], 1);
    assert!(body["uptime"].is_u64());

    server.stop().await;
    silo.shutdown().await?;
    Ok(())
}
