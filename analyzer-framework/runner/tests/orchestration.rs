use std::{
    fs,
    net::{Ipv4Addr, TcpListener as StdTcpListener},
    path::Path,
    sync::{Arc, Mutex},
    time::Duration,
};

use analyzer_framework_core::{
    constants::MAVEN_CACHE_VOLUME,
    provider::{AnalysisMode, ProviderKind},
};
use analyzer_framework_providers::settings::ProviderSettings;
use analyzer_framework_runner::{
    AnalyzeConfig, AnalyzeOrchestrator, DispatchEngine, RunSpec, RuntimeError, VolumeRecord,
    YamlRuleParser, errors::RunnerError, runtime::ContainerRuntime,
};
use async_trait::async_trait;
use serial_test::serial;
use tokio::{
    io::{AsyncBufReadExt as _, AsyncWriteExt as _, BufReader},
    net::TcpListener,
};
use tokio_util::sync::CancellationToken;

/// Runtime fake that records every call and, when asked, backs launched
/// "containers" with an in-process scripted provider server.
#[derive(Default)]
struct FakeRuntime {
    serve_providers: bool,
    networks_created: Mutex<Vec<String>>,
    networks_removed: Mutex<Vec<String>>,
    volumes_created: Mutex<Vec<(String, String)>>,
    volumes_removed: Mutex<Vec<String>>,
    detached_runs: Mutex<Vec<RunSpec>>,
    stops: Mutex<Vec<String>>,
}

impl FakeRuntime {
    fn serving() -> Self {
        Self {
            serve_providers: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn network_create(&self, name: &str) -> Result<(), RuntimeError> {
        self.networks_created.lock().unwrap().push(name.to_owned());
        Ok(())
    }
    async fn network_rm(&self, name: &str) -> Result<(), RuntimeError> {
        self.networks_removed.lock().unwrap().push(name.to_owned());
        Ok(())
    }
    async fn volume_create_bind(&self, name: &str, device: &str) -> Result<(), RuntimeError> {
        self.volumes_created
            .lock()
            .unwrap()
            .push((name.to_owned(), device.to_owned()));
        Ok(())
    }
    async fn volume_inspect(&self, name: &str) -> Result<VolumeRecord, RuntimeError> {
        let device = self
            .volumes_created
            .lock()
            .unwrap()
            .iter()
            .find(|(volume, _)| volume == name)
            .map(|(_, device)| device.clone());
        Ok(VolumeRecord {
            device,
            mountpoint: None,
        })
    }
    async fn volume_rm(&self, name: &str) -> Result<(), RuntimeError> {
        self.volumes_removed.lock().unwrap().push(name.to_owned());
        Ok(())
    }
    async fn run_detached(&self, spec: &RunSpec) -> Result<(), RuntimeError> {
        if self.serve_providers {
            let port = spec.ports.first().map(|(host, _)| *host).unwrap_or(0);
            serve_provider(port).await;
        }
        self.detached_runs.lock().unwrap().push(spec.clone());
        Ok(())
    }
    async fn run_oneshot(&self, _: &RunSpec) -> Result<String, RuntimeError> {
        Ok(String::new())
    }
    async fn stop(&self, container: &str) -> Result<(), RuntimeError> {
        self.stops.lock().unwrap().push(container.to_owned());
        Ok(())
    }
    async fn logs(&self, container: &str) -> Result<String, RuntimeError> {
        Ok(format!("log output for {container}\n"))
    }
    async fn image_inspect(&self, _: &str) -> Result<(), RuntimeError> {
        Ok(())
    }
}

/// Minimal provider speaking the line-delimited RPC protocol.
async fn serve_provider(port: u16) {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, port))
        .await
        .expect("provider port must be free after release");
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (read_half, mut write_half) = stream.into_split();
                let mut reader = BufReader::new(read_half);
                loop {
                    let mut line = String::new();
                    if reader.read_line(&mut line).await.unwrap_or(0) == 0 {
                        break;
                    }
                    let request: serde_json::Value = match serde_json::from_str(&line) {
                        Ok(request) => request,
                        Err(_) => break,
                    };
                    let id = request["id"].as_u64().unwrap_or(0);
                    let result = match request["method"].as_str().unwrap_or_default() {
                        "init" => serde_json::json!([]),
                        "evaluate" => serde_json::json!({
                            "matched": true,
                            "incidents": [{
                                "uri": "file:///opt/input/source/src/App.java",
                                "message": "reference found",
                                "lineNumber": 12,
                            }],
                        }),
                        "dependencies" => serde_json::json!({
                            "file:///opt/input/source/pom.xml": [
                                {"name": "org.slf4j", "version": "1.7.36"},
                            ],
                        }),
                        _ => serde_json::Value::Null,
                    };
                    let reply = serde_json::json!({"id": id, "result": result}).to_string() + "\n";
                    if write_half.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
}

fn orchestrator(runtime: Arc<FakeRuntime>) -> AnalyzeOrchestrator {
    AnalyzeOrchestrator::new(
        runtime,
        Arc::new(DispatchEngine),
        Arc::new(YamlRuleParser),
        ProviderSettings::from_env(),
    )
}

fn write_builtin_rules(dir: &Path) -> std::path::PathBuf {
    let rules = dir.join("content-rules.yaml");
    fs::write(
        &rules,
        r#"
- ruleID: content-jdbc-00001
  description: legacy jdbc url present
  category: mandatory
  when:
    builtin.filecontent:
      pattern: "jdbc:oracle"
"#,
    )
    .unwrap();
    rules
}

fn write_java_rules(dir: &Path) -> std::path::PathBuf {
    let rules = dir.join("java-rules.yaml");
    fs::write(
        &rules,
        r#"
- ruleID: java-oracle-00001
  description: oracle driver referenced
  when:
    java.referenced:
      pattern: oracle.jdbc.*
"#,
    )
    .unwrap();
    rules
}

fn base_config(input: &Path, output: &Path) -> AnalyzeConfig {
    let mut config = AnalyzeConfig::new(input, output);
    config.enable_default_rulesets = false;
    config.no_progress = true;
    config
}

#[tokio::test]
#[serial]
async fn builtin_only_run_starts_no_containers() {
    let workdir = tempfile::tempdir().unwrap();
    let input = workdir.path().join("app");
    fs::create_dir_all(&input).unwrap();
    fs::write(
        input.join("persistence.properties"),
        "url=jdbc:oracle:thin:@db:1521/app\n",
    )
    .unwrap();
    let rules = write_builtin_rules(workdir.path());
    let output = workdir.path().join("out");

    let runtime = Arc::new(FakeRuntime::default());
    let mut config = base_config(&input, &output);
    config.rules = vec![rules];
    config.mode = AnalysisMode::SourceOnly;

    let report = orchestrator(runtime.clone())
        .run(&CancellationToken::new(), config)
        .await
        .unwrap();

    assert!(runtime.detached_runs.lock().unwrap().is_empty());
    assert!(runtime.networks_created.lock().unwrap().is_empty());
    assert_eq!(report.rule_sets.len(), 1);
    assert!(report.rule_sets[0].violations.contains_key("content-jdbc-00001"));
    assert!(report.dependencies.is_none());
    assert!(output.join("output.yaml").exists());
    assert!(!output.join("dependencies.yaml").exists());
}

#[tokio::test]
#[serial]
async fn java_full_run_provisions_probes_and_unwinds() {
    unsafe { std::env::set_var("ANALYZER_SKIP_MAVEN_CACHE", "true") };
    let workdir = tempfile::tempdir().unwrap();
    let input = workdir.path().join("app");
    fs::create_dir_all(input.join("src")).unwrap();
    fs::write(input.join("src/App.java"), "class App {}\n").unwrap();
    let rules = write_java_rules(workdir.path());
    let output = workdir.path().join("out");

    let runtime = Arc::new(FakeRuntime::serving());
    let mut config = base_config(&input, &output);
    config.rules = vec![rules];
    config.providers = vec![ProviderKind::Java];
    config.readiness_timeout = Duration::from_secs(5);

    let report = orchestrator(runtime.clone())
        .run(&CancellationToken::new(), config)
        .await
        .unwrap();
    unsafe { std::env::remove_var("ANALYZER_SKIP_MAVEN_CACHE") };

    // One java container, launched once and stopped once.
    let runs = runtime.detached_runs.lock().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runtime.stops.lock().unwrap().len(), 1);

    // Ephemeral volume and network are created and reclaimed exactly once;
    // the maven cache volume was disabled by env and never created.
    let created: Vec<String> = runtime
        .volumes_created
        .lock()
        .unwrap()
        .iter()
        .map(|(name, _)| name.clone())
        .collect();
    assert_eq!(created.len(), 1);
    assert!(!created.contains(&MAVEN_CACHE_VOLUME.to_owned()));
    assert_eq!(*runtime.volumes_removed.lock().unwrap(), created);
    assert_eq!(runtime.networks_removed.lock().unwrap().len(), 1);

    // The scripted provider matched the rule and reported dependencies.
    assert!(report.rule_sets[0].violations.contains_key("java-oracle-00001"));
    let dependencies = report.dependencies.unwrap();
    assert_eq!(dependencies.len(), 1);
    assert_eq!(dependencies[0].provider, "java");
    assert!(output.join("dependencies.yaml").exists());
    assert!(output.join("provider.log").exists());
}

#[tokio::test]
#[serial]
async fn maven_cache_volume_survives_cleanup() {
    let workdir = tempfile::tempdir().unwrap();
    let input = workdir.path().join("app");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("Main.java"), "class Main {}\n").unwrap();
    let rules = write_java_rules(workdir.path());
    let output = workdir.path().join("out");

    let runtime = Arc::new(FakeRuntime::serving());
    let mut config = base_config(&input, &output);
    config.rules = vec![rules];
    config.providers = vec![ProviderKind::Java];
    config.readiness_timeout = Duration::from_secs(5);

    orchestrator(runtime.clone())
        .run(&CancellationToken::new(), config)
        .await
        .unwrap();

    let created: Vec<String> = runtime
        .volumes_created
        .lock()
        .unwrap()
        .iter()
        .map(|(name, _)| name.clone())
        .collect();
    assert!(created.contains(&MAVEN_CACHE_VOLUME.to_owned()));
    assert!(
        !runtime
            .volumes_removed
            .lock()
            .unwrap()
            .contains(&MAVEN_CACHE_VOLUME.to_owned())
    );
}

#[tokio::test]
#[serial]
async fn readiness_timeout_reclaims_everything() {
    unsafe { std::env::set_var("ANALYZER_SKIP_MAVEN_CACHE", "true") };
    let workdir = tempfile::tempdir().unwrap();
    let input = workdir.path().join("app");
    fs::create_dir_all(&input).unwrap();
    let rules = write_java_rules(workdir.path());
    let output = workdir.path().join("out");

    // serve_providers is off: the container "starts" but nothing listens.
    let runtime = Arc::new(FakeRuntime::default());
    let mut config = base_config(&input, &output);
    config.rules = vec![rules];
    config.providers = vec![ProviderKind::Java];
    config.readiness_timeout = Duration::from_millis(300);

    let err = orchestrator(runtime.clone())
        .run(&CancellationToken::new(), config)
        .await
        .unwrap_err();
    unsafe { std::env::remove_var("ANALYZER_SKIP_MAVEN_CACHE") };

    assert!(err.to_string().contains("failed to become ready"));
    assert_eq!(runtime.stops.lock().unwrap().len(), 1);
    assert_eq!(runtime.volumes_removed.lock().unwrap().len(), 1);
    assert_eq!(runtime.networks_removed.lock().unwrap().len(), 1);
}

#[tokio::test]
#[serial]
async fn pre_bound_override_port_fails_validation_before_provisioning() {
    let workdir = tempfile::tempdir().unwrap();
    let input = workdir.path().join("app");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("Main.java"), "class Main {}\n").unwrap();
    let rules = write_java_rules(workdir.path());
    let output = workdir.path().join("out");

    let blocker = StdTcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let port = blocker.local_addr().unwrap().port();
    let overrides = workdir.path().join("overrides.json");
    fs::write(
        &overrides,
        format!(r#"[{{"name": "java", "address": "localhost:{port}"}}]"#),
    )
    .unwrap();

    let runtime = Arc::new(FakeRuntime::default());
    let mut config = base_config(&input, &output);
    config.rules = vec![rules];
    config.providers = vec![ProviderKind::Java];
    config.override_file = Some(overrides);

    let err = orchestrator(runtime.clone())
        .run(&CancellationToken::new(), config)
        .await
        .unwrap_err();

    assert!(err.to_string().contains(&port.to_string()));
    assert!(runtime.detached_runs.lock().unwrap().is_empty());
    assert!(runtime.networks_created.lock().unwrap().is_empty());
}

#[tokio::test]
#[serial]
async fn output_directory_is_not_clobbered_without_overwrite() {
    let workdir = tempfile::tempdir().unwrap();
    let input = workdir.path().join("app");
    fs::create_dir_all(&input).unwrap();
    let output = workdir.path().join("out");
    fs::create_dir_all(&output).unwrap();
    fs::write(output.join("output.yaml"), "prior results").unwrap();

    let runtime = Arc::new(FakeRuntime::default());
    let config = base_config(&input, &output);

    let err = orchestrator(runtime)
        .run(&CancellationToken::new(), config)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RunnerError::Validation(analyzer_framework_runner::ValidationError::OutputExists { .. })
    ));
    assert_eq!(
        fs::read_to_string(output.join("output.yaml")).unwrap(),
        "prior results"
    );
}

#[tokio::test]
#[serial]
async fn repeated_runs_produce_identical_output() {
    let workdir = tempfile::tempdir().unwrap();
    let input = workdir.path().join("app");
    fs::create_dir_all(&input).unwrap();
    fs::write(input.join("app.properties"), "url=jdbc:oracle:thin\n").unwrap();
    let rules = write_builtin_rules(workdir.path());
    let output = workdir.path().join("out");

    let mut first_bytes = Vec::new();
    for _ in 0..2 {
        let runtime = Arc::new(FakeRuntime::default());
        let mut config = base_config(&input, &output);
        config.rules = vec![rules.clone()];
        config.overwrite = true;
        orchestrator(runtime)
            .run(&CancellationToken::new(), config)
            .await
            .unwrap();
        let bytes = fs::read(output.join("output.yaml")).unwrap();
        if first_bytes.is_empty() {
            first_bytes = bytes;
        } else {
            assert_eq!(first_bytes, bytes);
        }
    }
}
