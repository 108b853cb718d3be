use crate::model::AppSpec;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

// Registry configuration sourced from environment variables, with an
// optional YAML override file for ops-friendly deployments.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    // HTTP bind address for the RPC API.
    pub bind_addr: SocketAddr,
    // Metrics HTTP bind address.
    pub metrics_bind: SocketAddr,
    // Deployment environment; dev unlocks the dev login state.
    pub env: Environment,
    // Replay window for login nonces.
    pub nonce_ttl: Duration,
    // Permission patterns granted to every app on top of its own.
    pub common_permissions: Vec<String>,
    // Seed file for the in-memory app config store.
    pub apps_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            other => anyhow::bail!("unknown environment: {other}"),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RegistryConfigOverride {
    bind_addr: Option<String>,
    metrics_bind: Option<String>,
    env: Option<String>,
    nonce_ttl_secs: Option<u64>,
    common_permissions: Option<Vec<String>>,
    apps_file: Option<PathBuf>,
}

impl RegistryConfig {
    pub fn from_env() -> Result<Self> {
        // Environment variables provide defaults for local development.
        let bind_addr = std::env::var("LIBRA_BIND")
            .unwrap_or_else(|_| "0.0.0.0:8090".to_string())
            .parse()
            .with_context(|| "parse LIBRA_BIND")?;
        let metrics_bind = std::env::var("LIBRA_METRICS_BIND")
            .unwrap_or_else(|_| "0.0.0.0:9090".to_string())
            .parse()
            .with_context(|| "parse LIBRA_METRICS_BIND")?;
        let env = std::env::var("LIBRA_ENV")
            .unwrap_or_else(|_| "dev".to_string())
            .parse()?;
        let nonce_ttl = std::env::var("LIBRA_NONCE_TTL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .map(Duration::from_secs)
            .with_context(|| "parse LIBRA_NONCE_TTL_SECS")?;
        let apps_file = std::env::var("LIBRA_APPS_FILE").ok().map(PathBuf::from);
        Ok(Self {
            bind_addr,
            metrics_bind,
            env,
            nonce_ttl,
            // The privileged surfaces every app may reach with its secret.
            common_permissions: vec!["/v1/admin/**".to_string(), "/v1/pubsub/**".to_string()],
            apps_file,
        })
    }

    pub fn from_env_or_yaml() -> Result<Self> {
        let mut config = Self::from_env()?;
        if let Ok(path) = std::env::var("LIBRA_CONFIG") {
            let contents =
                fs::read_to_string(&path).with_context(|| format!("read LIBRA_CONFIG: {path}"))?;
            let override_cfg: RegistryConfigOverride =
                serde_yaml::from_str(&contents).with_context(|| "parse registry config yaml")?;
            if let Some(value) = override_cfg.bind_addr {
                config.bind_addr = value.parse().with_context(|| "parse bind_addr")?;
            }
            if let Some(value) = override_cfg.metrics_bind {
                config.metrics_bind = value.parse().with_context(|| "parse metrics_bind")?;
            }
            if let Some(value) = override_cfg.env {
                config.env = value.parse()?;
            }
            if let Some(value) = override_cfg.nonce_ttl_secs {
                config.nonce_ttl = Duration::from_secs(value);
            }
            if let Some(value) = override_cfg.common_permissions {
                config.common_permissions = value;
            }
            if let Some(value) = override_cfg.apps_file {
                config.apps_file = Some(value);
            }
        }
        Ok(config)
    }
}

/// Load seed app documents for the in-memory config store.
pub fn load_app_specs(path: &PathBuf) -> Result<Vec<AppSpec>> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("read apps file: {}", path.display()))?;
    serde_yaml::from_str(&contents).with_context(|| "parse apps file")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tempfile::TempDir;

    fn clear_libra_env() {
        for (key, _) in env::vars() {
            if key.starts_with("LIBRA_") {
                unsafe {
                    env::remove_var(key);
                }
            }
        }
    }

    #[serial]
    #[test]
    fn from_env_uses_defaults() {
        clear_libra_env();
        let config = RegistryConfig::from_env().expect("from_env");
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8090");
        assert_eq!(config.metrics_bind.to_string(), "0.0.0.0:9090");
        assert_eq!(config.env, Environment::Dev);
        assert_eq!(config.nonce_ttl, Duration::from_secs(60));
        assert!(config.apps_file.is_none());
    }

    #[serial]
    #[test]
    fn from_env_respects_env_vars() {
        clear_libra_env();
        unsafe {
            env::set_var("LIBRA_BIND", "127.0.0.1:7001");
            env::set_var("LIBRA_ENV", "prod");
            env::set_var("LIBRA_NONCE_TTL_SECS", "120");
        }
        let config = RegistryConfig::from_env().expect("from_env");
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:7001");
        assert_eq!(config.env, Environment::Prod);
        assert_eq!(config.nonce_ttl, Duration::from_secs(120));
        clear_libra_env();
    }

    #[serial]
    #[test]
    fn from_env_rejects_bad_values() {
        clear_libra_env();
        unsafe {
            env::set_var("LIBRA_ENV", "staging");
        }
        assert!(RegistryConfig::from_env().is_err());
        clear_libra_env();
    }

    #[serial]
    #[test]
    fn yaml_overrides_env_defaults() {
        clear_libra_env();
        let tmpdir = TempDir::new().unwrap();
        let config_path = tmpdir.path().join("config.yml");
        std::fs::write(
            &config_path,
            r#"
bind_addr: "127.0.0.1:7443"
env: "prod"
nonce_ttl_secs: 30
common_permissions:
  - "/v1/admin/**"
"#,
        )
        .unwrap();
        unsafe {
            env::set_var("LIBRA_CONFIG", config_path.to_str().unwrap());
        }
        let config = RegistryConfig::from_env_or_yaml().expect("from_env_or_yaml");
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:7443");
        assert_eq!(config.env, Environment::Prod);
        assert_eq!(config.nonce_ttl, Duration::from_secs(30));
        assert_eq!(config.common_permissions, vec!["/v1/admin/**".to_string()]);
        clear_libra_env();
    }

    #[serial]
    #[test]
    fn missing_yaml_file_fails() {
        clear_libra_env();
        let tmpdir = TempDir::new().unwrap();
        let nonexistent = tmpdir.path().join("nope.yml");
        unsafe {
            env::set_var("LIBRA_CONFIG", nonexistent.to_str().unwrap());
        }
        assert!(RegistryConfig::from_env_or_yaml().is_err());
        clear_libra_env();
    }

    #[serial]
    #[test]
    fn app_specs_load_from_yaml() {
        let tmpdir = TempDir::new().unwrap();
        let apps_path = tmpdir.path().join("apps.yml");
        std::fs::write(
            &apps_path,
            r#"
- id: alpha
  key: 7
  secret: s
  fingerprint: fp
  permissions:
    - "/v1/admin/**"
"#,
        )
        .unwrap();
        let specs = load_app_specs(&apps_path).expect("load");
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].id, "alpha");
        assert_eq!(specs[0].key, 7);
    }
}
