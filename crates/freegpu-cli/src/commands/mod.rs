//! CLI commands implementation

use anyhow::{Context, Result};
use freegpu_core::{FreeGpuConfig, Restriction};
use freegpu_resolver::{choose_idle, resolve_single_device, DeviceSnapshot, Resolver, Selection};
use freegpu_runtime::{DetachedContext, DeviceContext, NvidiaSmi};

use crate::Source;

/// Options for the `select` command
#[derive(Debug, Clone, Copy)]
pub struct SelectOptions {
    pub json: bool,
    pub display: bool,
    pub materialize: bool,
}

/// Build the resolver for the requested device source
pub fn build_resolver(source: Source, config: &FreeGpuConfig) -> Result<Resolver> {
    match source {
        Source::Smi => Ok(Resolver::from_provider(NvidiaSmi::new(config.smi.clone()))),
        Source::Nvml => nvml_resolver(),
    }
}

#[cfg(feature = "nvml")]
fn nvml_resolver() -> Result<Resolver> {
    Ok(Resolver::from_provider(freegpu_runtime::NvmlProvider::new()))
}

#[cfg(not(feature = "nvml"))]
fn nvml_resolver() -> Result<Resolver> {
    anyhow::bail!("freegpu was built without NVML support; rebuild with --features nvml")
}

#[cfg(feature = "cuda")]
fn device_context(materialize: bool) -> Result<Box<dyn DeviceContext>> {
    if materialize {
        Ok(Box::new(freegpu_runtime::CudaDeviceContext::new()))
    } else {
        Ok(Box::new(DetachedContext::new()))
    }
}

#[cfg(not(feature = "cuda"))]
fn device_context(materialize: bool) -> Result<Box<dyn DeviceContext>> {
    if materialize {
        anyhow::bail!(
            "freegpu was built without CUDA support and cannot initialize the device; \
             rebuild with --features cuda or pass --no-materialize"
        );
    }
    Ok(Box::new(DetachedContext::new()))
}

/// Assign a GPU to this process
pub async fn select(
    resolver: &Resolver,
    config: &FreeGpuConfig,
    opts: SelectOptions,
) -> Result<Selection> {
    let var = &config.restriction.env_var;

    if !opts.json {
        print_system_info(var);
    }

    let restriction = Restriction::from_env(var).with_context(|| format!("reading {}", var))?;
    let mut context = device_context(opts.materialize)?;

    let selection = resolve_single_device(resolver, &restriction, &mut *context)
        .await
        .context("selecting a GPU")?;

    println!("{}", selection_output(&selection, opts.json)?);

    if opts.display {
        NvidiaSmi::new(config.smi.clone()).display().await?;
    }

    Ok(selection)
}

fn selection_output(selection: &Selection, json: bool) -> Result<String> {
    if json {
        Ok(serde_json::to_string_pretty(selection)?)
    } else {
        Ok(format!(
            "PID {} uses GPU {}",
            std::process::id(),
            selection.assignment.ordinal
        ))
    }
}

/// List idle GPUs
pub async fn idle(resolver: &Resolver, json: bool) -> Result<DeviceSnapshot> {
    let snapshot = resolver.snapshot().await.context("listing idle GPUs")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print!("{}", idle_table(&snapshot));
    }

    Ok(snapshot)
}

fn idle_table(snapshot: &DeviceSnapshot) -> String {
    let mut out = format!(
        "GPUs: {} total, {} idle\n",
        snapshot.devices.len(),
        snapshot.idle.len()
    );

    if !snapshot.devices.is_empty() {
        out.push('\n');
        let mut devices = snapshot.devices.clone();
        devices.sort_by_key(|d| d.index);
        for device in devices {
            let state = if snapshot.idle.contains(&device.index) {
                "Idle"
            } else {
                "In Use"
            };
            out.push_str(&format!("[{}] {} - {}\n", device.index, device.bus_id, state));
        }
    }

    out
}

/// Print an export line for the highest idle GPU
pub async fn env(resolver: &Resolver, config: &FreeGpuConfig) -> Result<String> {
    let snapshot = resolver.snapshot().await.context("listing idle GPUs")?;
    let ordinal = choose_idle(&snapshot.idle, snapshot.devices.len())?;
    let line = export_line(&config.restriction.env_var, ordinal);
    println!("{}", line);
    Ok(line)
}

fn export_line(var: &str, ordinal: u32) -> String {
    format!("export {}={}", var, ordinal)
}

/// Helper to print host details before a selection
fn print_system_info(var: &str) {
    println!("freegpu v{}", env!("CARGO_PKG_VERSION"));
    println!("  OS: {} ({})", std::env::consts::OS, std::env::consts::ARCH);
    println!("  PID: {}", std::process::id());
    println!(
        "  {}: {}",
        var,
        std::env::var(var).unwrap_or_else(|_| "<unset>".to_string())
    );
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use freegpu_core::{FreeGpuError, SmiConfig};
    use freegpu_resolver::AssignmentSource;
    use std::path::PathBuf;

    /// Config whose smi program is `sh` running a script that prints fixed CSV
    fn fake_smi_config(dir: &tempfile::TempDir, inventory: &str, apps: &str) -> FreeGpuConfig {
        let inventory_path = dir.path().join("inventory.csv");
        let apps_path = dir.path().join("apps.csv");
        let script_path = dir.path().join("nvidia-smi.sh");
        std::fs::write(&inventory_path, inventory).unwrap();
        std::fs::write(&apps_path, apps).unwrap();
        std::fs::write(
            &script_path,
            format!(
                "case \"$1\" in\n\
                 --query-gpu=*) cat '{}' ;;\n\
                 --query-compute-apps=*) cat '{}' ;;\n\
                 esac\n",
                inventory_path.display(),
                apps_path.display()
            ),
        )
        .unwrap();

        let script = script_path.display().to_string();
        let mut config = FreeGpuConfig::default();
        config.smi = SmiConfig {
            program: PathBuf::from("sh"),
            inventory_args: vec![script.clone(), "--query-gpu=index,gpu_bus_id".to_string()],
            compute_apps_args: vec![
                script,
                "--query-compute-apps=pid,gpu_bus_id".to_string(),
            ],
        };
        config
    }

    fn quiet(materialize: bool) -> SelectOptions {
        SelectOptions {
            json: true,
            display: false,
            materialize,
        }
    }

    #[tokio::test]
    async fn test_select_claims_highest_idle() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fake_smi_config(&dir, "0, a\n1, b\n2, c\n", "4242, b\n");
        config.restriction.env_var = "FREEGPU_TEST_SELECT_UNSET".to_string();
        std::env::remove_var("FREEGPU_TEST_SELECT_UNSET");
        let resolver = build_resolver(Source::Smi, &config).unwrap();

        let selection = select(&resolver, &config, quiet(false)).await.unwrap();

        assert_eq!(selection.assignment.ordinal, 2);
        assert_eq!(
            selection.assignment.source,
            AssignmentSource::Idle { idle: vec![0, 2] }
        );
        assert_eq!(selection.device.device, 2);
    }

    #[tokio::test]
    async fn test_select_reads_configured_restriction_variable() {
        let dir = tempfile::tempdir().unwrap();
        // A busy bus id missing from the inventory fails if the tool is queried
        let mut config = fake_smi_config(&dir, "0, a\n", "4242, zz\n");
        config.restriction.env_var = "FREEGPU_TEST_SELECT_RESTRICTED".to_string();
        std::env::set_var("FREEGPU_TEST_SELECT_RESTRICTED", "3");
        let resolver = build_resolver(Source::Smi, &config).unwrap();

        let selection = select(&resolver, &config, quiet(false)).await.unwrap();

        assert_eq!(selection.assignment.ordinal, 3);
        assert_eq!(
            selection.assignment.source,
            AssignmentSource::Restricted {
                value: "3".to_string()
            }
        );
        assert_eq!(selection.device.device, 0);
    }

    #[tokio::test]
    async fn test_select_rejects_malformed_restriction() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fake_smi_config(&dir, "0, a\n", "");
        config.restriction.env_var = "FREEGPU_TEST_SELECT_MALFORMED".to_string();
        std::env::set_var("FREEGPU_TEST_SELECT_MALFORMED", "first");
        let resolver = build_resolver(Source::Smi, &config).unwrap();

        let err = select(&resolver, &config, quiet(false)).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FreeGpuError>(),
            Some(FreeGpuError::InvalidRestriction { .. })
        ));
    }

    #[cfg(not(feature = "cuda"))]
    #[tokio::test]
    async fn test_select_requires_cuda_to_materialize() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fake_smi_config(&dir, "0, a\n", "");
        config.restriction.env_var = "FREEGPU_TEST_SELECT_NO_CUDA".to_string();
        std::env::set_var("FREEGPU_TEST_SELECT_NO_CUDA", "3");
        let resolver = build_resolver(Source::Smi, &config).unwrap();

        let err = select(&resolver, &config, quiet(true)).await.unwrap_err();
        assert!(err.to_string().contains("without CUDA support"));
        assert!(device_context(true).is_err());
    }

    #[test]
    fn test_detached_context_without_materialize() {
        let mut ctx = device_context(false).unwrap();
        assert_eq!(ctx.name(), "detached");
        assert!(!ctx.materialize().unwrap().materialized);
    }

    #[tokio::test]
    async fn test_selection_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fake_smi_config(&dir, "0, a\n1, b\n", "");
        config.restriction.env_var = "FREEGPU_TEST_OUTPUT_UNSET".to_string();
        std::env::remove_var("FREEGPU_TEST_OUTPUT_UNSET");
        let resolver = build_resolver(Source::Smi, &config).unwrap();
        let selection = select(&resolver, &config, quiet(false)).await.unwrap();

        assert_eq!(
            selection_output(&selection, false).unwrap(),
            format!("PID {} uses GPU 1", std::process::id())
        );

        let json: serde_json::Value =
            serde_json::from_str(&selection_output(&selection, true).unwrap()).unwrap();
        assert_eq!(json["assignment"]["ordinal"], 1);
        assert_eq!(json["assignment"]["source"]["kind"], "idle");
        assert_eq!(json["device"]["materialized"], false);
    }

    #[tokio::test]
    async fn test_idle_marks_busy_devices() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_smi_config(&dir, "1, b\n0, a\n2, c\n", "4242, b\n4243, b\n");
        let resolver = build_resolver(Source::Smi, &config).unwrap();

        let snapshot = idle(&resolver, true).await.unwrap();
        assert_eq!(snapshot.idle, vec![0, 2]);

        let table = idle_table(&snapshot);
        assert!(table.starts_with("GPUs: 3 total, 2 idle\n"));
        assert!(table.contains("[0] a - Idle\n"));
        assert!(table.contains("[1] b - In Use\n"));
        assert!(table.contains("[2] c - Idle\n"));
        assert!(table.find("[0]").unwrap() < table.find("[1]").unwrap());
    }

    #[tokio::test]
    async fn test_env_prints_export_line() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = fake_smi_config(&dir, "0, a\n1, b\n2, c\n", "4242, c\n");
        config.restriction.env_var = "HIP_VISIBLE_DEVICES".to_string();
        let resolver = build_resolver(Source::Smi, &config).unwrap();

        let line = env(&resolver, &config).await.unwrap();
        assert_eq!(line, "export HIP_VISIBLE_DEVICES=1");
    }

    #[tokio::test]
    async fn test_env_fails_when_all_busy() {
        let dir = tempfile::tempdir().unwrap();
        let config = fake_smi_config(&dir, "0, a\n1, b\n", "4242, a\n4243, b\n");
        let resolver = build_resolver(Source::Smi, &config).unwrap();

        let err = env(&resolver, &config).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<FreeGpuError>(),
            Some(FreeGpuError::NoIdleDevice { total: 2 })
        ));
    }

    #[cfg(not(feature = "nvml"))]
    #[test]
    fn test_nvml_source_requires_feature() {
        let err = build_resolver(Source::Nvml, &FreeGpuConfig::default())
            .err()
            .unwrap();
        assert!(err.to_string().contains("NVML"));
    }

    #[cfg(feature = "nvml")]
    #[test]
    fn test_nvml_source_builds_without_loading_nvml() {
        assert!(build_resolver(Source::Nvml, &FreeGpuConfig::default()).is_ok());
    }
}
