use std::{collections::BTreeMap, path::Path};

use anyhow::Context;
use multiworld_core::WorldSpec;

pub type Properties = BTreeMap<String, String>;

pub const FILE_NAME: &str = "server.properties";

/// Built-in defaults for a dedicated world. Operators may layer a template
/// file over these (see [`load_template`]).
pub fn default_template() -> Properties {
    [
        ("motd", "Multiworld Server"),
        ("sub-motd", "multiworld"),
        ("server-ip", "0.0.0.0"),
        ("server-port", "19132"),
        ("server-portv6", "19133"),
        ("level-name", "world"),
        ("level-seed", ""),
        ("level-type", "DEFAULT"),
        ("generator-settings", ""),
        ("gamemode", "0"),
        ("force-gamemode", "false"),
        ("hardcore", "false"),
        ("pvp", "true"),
        ("difficulty", "1"),
        ("max-players", "20"),
        ("view-distance", "10"),
        ("spawn-protection", "16"),
        ("white-list", "false"),
        ("allow-flight", "false"),
        ("announce-player-achievements", "true"),
        ("achievements", "true"),
        ("enable-query", "true"),
        ("enable-rcon", "false"),
        ("auto-save", "true"),
        ("force-resources", "false"),
        ("xbox-auth", "true"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

/// Built-in template with an optional template file layered on top.
pub fn load_template(path: Option<&Path>) -> anyhow::Result<Properties> {
    let mut out = default_template();
    if let Some(path) = path {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read property template {}", path.display()))?;
        out.extend(parse(&text));
    }
    Ok(out)
}

/// Template fills the gaps, per-world overrides win, and the world's own
/// identity (ports, level name) wins over both.
pub fn merge(template: &Properties, spec: &WorldSpec) -> Properties {
    let mut out = template.clone();
    for (k, v) in &spec.overrides {
        out.insert(k.clone(), v.to_string());
    }
    if let Some(port) = spec.primary_port {
        out.insert("server-port".to_string(), port.to_string());
    }
    if let Some(port) = spec.secondary_port {
        out.insert("server-portv6".to_string(), port.to_string());
    }
    out.insert("level-name".to_string(), spec.level_name.clone());
    out
}

pub fn parse(text: &str) -> Properties {
    let mut out = Properties::new();
    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let trimmed = line.trim_start();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };
        let k = k.trim();
        if k.is_empty() {
            continue;
        }
        out.insert(k.to_string(), v.to_string());
    }
    out
}

fn key_round_trips(k: &str) -> bool {
    !k.is_empty()
        && k.trim() == k
        && !k.starts_with('#')
        && !k.contains(['=', '\n', '\r'])
}

pub fn write(props: &Properties) -> String {
    let mut out = String::from("#Properties Config file\n");
    for (k, v) in props {
        if !key_round_trips(k) || v.contains(['\n', '\r']) {
            tracing::warn!(key = %k, "skipping property that cannot be written");
            continue;
        }
        out.push_str(k);
        out.push('=');
        out.push_str(v);
        out.push('\n');
    }
    out
}

/// Write `server.properties` into the world directory via tmp + rename.
pub async fn write_file(world_dir: &Path, props: &Properties) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(world_dir)
        .await
        .with_context(|| format!("create world dir {}", world_dir.display()))?;
    let path = world_dir.join(FILE_NAME);
    let tmp = world_dir.join(format!("{FILE_NAME}.tmp"));
    tokio::fs::write(&tmp, write(props).as_bytes())
        .await
        .context("write server.properties.tmp")?;
    tokio::fs::rename(&tmp, &path)
        .await
        .context("persist server.properties")?;
    Ok(())
}
