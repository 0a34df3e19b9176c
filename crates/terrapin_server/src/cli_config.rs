//! Emits the engine CLI-configuration file that points a working directory
//! at this server: the shared plug-in cache directory, one `host` block per
//! intercepted registry, and a `provider_installation` block mirroring the
//! server's own source routing so the engine and the server agree on which
//! source handles which provider.

use std::{fmt::Write as _, path::Path};

use terrapin_registry::ProviderPattern;

use crate::{ServerConfig, ServerError, SourceConfig};

/// Renders the CLI configuration. `server_url` is how the engine reaches
/// this server (e.g. `http://127.0.0.1:38615`); `correlation_id` is baked
/// into the provider-service URLs so the server can batch the run's cache
/// results.
pub fn render_engine_config(
    config: &ServerConfig,
    server_url: &str,
    correlation_id: &str,
) -> String {
    let mut out = String::new();
    let server_url = server_url.trim_end_matches('/');

    writeln!(
        out,
        "plugin_cache_dir = \"{}\"",
        config.cache_dir.display()
    )
    .expect("writing to a string");

    for registry in &config.registries {
        out.push('\n');
        writeln!(out, "host \"{registry}\" {{").expect("writing to a string");
        out.push_str("  services = {\n");
        writeln!(
            out,
            "    \"providers.v1\" = \"{server_url}/v1/providers/{correlation_id}/{registry}/\""
        )
        .expect("writing to a string");
        out.push_str("  }\n}\n");
    }

    out.push_str("\nprovider_installation {\n");
    for source in &config.sources {
        match source {
            SourceConfig::Direct { matches } => {
                out.push_str("  direct {\n");
                push_patterns(&mut out, "include", &matches.includes);
                push_patterns(&mut out, "exclude", &matches.excludes);
                out.push_str("  }\n");
            }
            SourceConfig::FilesystemMirror { root, matches } => {
                out.push_str("  filesystem_mirror {\n");
                writeln!(out, "    path    = \"{}\"", root.display())
                    .expect("writing to a string");
                push_patterns(&mut out, "include", &matches.includes);
                push_patterns(&mut out, "exclude", &matches.excludes);
                out.push_str("  }\n");
            }
            SourceConfig::NetworkMirror { url, matches } => {
                out.push_str("  network_mirror {\n");
                writeln!(out, "    url     = \"{url}\"").expect("writing to a string");
                push_patterns(&mut out, "include", &matches.includes);
                push_patterns(&mut out, "exclude", &matches.excludes);
                out.push_str("  }\n");
            }
        }
    }
    out.push_str("}\n");
    out
}

/// Renders and writes the configuration file.
pub fn write_engine_config(
    path: &Path,
    config: &ServerConfig,
    server_url: &str,
    correlation_id: &str,
) -> Result<(), ServerError> {
    fs_err::write(path, render_engine_config(config, server_url, correlation_id))?;
    Ok(())
}

fn push_patterns(out: &mut String, key: &str, patterns: &[ProviderPattern]) {
    if patterns.is_empty() {
        return;
    }
    let rendered = patterns
        .iter()
        .map(|pattern| format!("\"{pattern}\""))
        .collect::<Vec<_>>()
        .join(", ");
    writeln!(out, "    {key} = [{rendered}]").expect("writing to a string");
}
