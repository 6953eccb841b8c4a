//! Cached, process-wide read access to compiled rule packs.
//!
//! Cache key is `(helper_root, normalized_category)`. A cache hit requires
//! the current filesystem signature to equal the stored one; signature probes
//! are memoized for one second to coalesce bursts. Component-DB overrides
//! apply at load time, so a signature change re-applies them.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

use crate::model::{
    ComponentDbFile, ComponentEntry, CrossValidationRules, FieldGroups, FieldRulesArtifact,
    KeyMigrations, KnownValues, MANIFEST_FILE, Manifest, ParseTemplates,
};
use crate::paths::{
    component_db_dir, generated_dir, normalize_category, overrides_components_dir,
};

const PROBE_TTL: Duration = Duration::from_secs(1);

/// A fully loaded rule pack. Immutable once constructed; shared via `Arc`.
#[derive(Debug)]
pub struct RulePack {
    pub category: String,
    pub field_rules: FieldRulesArtifact,
    pub known_values: KnownValues,
    pub parse_templates: ParseTemplates,
    pub cross_validation: CrossValidationRules,
    pub field_groups: FieldGroups,
    pub key_migrations: KeyMigrations,
    pub manifest: Manifest,
    pub components: ComponentDb,
}

impl RulePack {
    /// Field keys in UI-catalog order when available, else sorted.
    #[must_use]
    pub fn field_order(&self) -> Vec<String> {
        self.field_rules.fields.keys().cloned().collect()
    }
}

/// Component library with token, alias, and ambiguity indexes.
#[derive(Debug, Default)]
pub struct ComponentDb {
    /// `"<canonical_name>::<maker>"` (suffixing on collision) → entry.
    pub entries: BTreeMap<String, IndexedComponent>,
    /// Case- and whitespace-insensitive name/alias → token, first-wins.
    name_index: HashMap<String, String>,
    /// Same key space, but retaining every match for ambiguity detection.
    multi_index: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct IndexedComponent {
    pub component_type: String,
    pub entry: ComponentEntry,
}

impl ComponentDb {
    /// Resolve a free-text name or alias to its first-wins entry.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<&IndexedComponent> {
        let token = self.name_index.get(&fold(name))?;
        self.entries.get(token)
    }

    /// True when a name maps to more than one distinct entry.
    #[must_use]
    pub fn is_ambiguous(&self, name: &str) -> bool {
        self.multi_index
            .get(&fold(name))
            .is_some_and(|tokens| tokens.len() > 1)
    }

    /// Known canonical names for one component type, used as the
    /// known-entities slice of evidence packs.
    #[must_use]
    pub fn canonical_names(&self, component_type: &str) -> Vec<String> {
        self.entries
            .values()
            .filter(|c| c.component_type == component_type)
            .map(|c| c.entry.canonical_name.clone())
            .collect()
    }

    fn insert(&mut self, component_type: &str, entry: ComponentEntry) {
        let base = format!("{}::{}", entry.canonical_name, entry.maker);
        let mut token = base.clone();
        let mut suffix = 1;
        while self.entries.contains_key(&token) {
            suffix += 1;
            token = format!("{base}#{suffix}");
        }

        self.index_name(&entry.canonical_name, &token);
        for alias in &entry.aliases {
            self.index_name(alias, &token);
        }
        self.entries.insert(
            token,
            IndexedComponent {
                component_type: component_type.to_string(),
                entry,
            },
        );
    }

    fn index_name(&mut self, name: &str, token: &str) {
        let key = fold(name);
        if key.is_empty() {
            return;
        }
        self.name_index
            .entry(key.clone())
            .or_insert_with(|| token.to_string());
        let tokens = self.multi_index.entry(key).or_default();
        if !tokens.iter().any(|t| t == token) {
            tokens.push(token.to_string());
        }
    }

    fn reindex_aliases(&mut self, token: &str, old_aliases: &[String], new_aliases: &[String]) {
        for alias in old_aliases {
            let key = fold(alias);
            if let Some(tokens) = self.multi_index.get_mut(&key) {
                tokens.retain(|t| t != token);
            }
            if self.name_index.get(&key).is_some_and(|t| t == token) {
                self.name_index.remove(&key);
                // Promote the next holder if the alias is still claimed.
                if let Some(next) = self
                    .multi_index
                    .get(&key)
                    .and_then(|tokens| tokens.first())
                {
                    self.name_index.insert(key.clone(), next.clone());
                }
            }
        }
        for alias in new_aliases {
            self.index_name(alias, token);
        }
    }
}

fn fold(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// One `_overrides/components/*.json` file.
#[derive(Debug, Clone, Deserialize)]
struct ComponentOverride {
    component_type: String,
    name: String,
    #[serde(default)]
    properties: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    canonical_name: Option<String>,
    #[serde(default)]
    maker: Option<String>,
    #[serde(default)]
    aliases: Option<Vec<String>>,
    #[serde(default)]
    links: Option<Vec<String>>,
}

struct CacheSlot {
    signature: String,
    pack: Arc<RulePack>,
    last_probe: Instant,
}

static CACHE: Lazy<Mutex<HashMap<(String, String), CacheSlot>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Load a category's rule pack, serving from cache while the filesystem
/// signature is unchanged. Two loads separated only by time return the same
/// `Arc`.
pub fn load_rule_pack(helper_root: &Utf8Path, category: &str) -> Result<Arc<RulePack>> {
    let category = normalize_category(category)?;
    let key = (helper_root.to_string(), category.clone());

    let mut cache = CACHE.lock().unwrap_or_else(std::sync::PoisonError::into_inner);

    if let Some(slot) = cache.get_mut(&key) {
        if slot.last_probe.elapsed() < PROBE_TTL {
            return Ok(Arc::clone(&slot.pack));
        }
        let signature = pack_signature(helper_root, &category)?;
        if signature == slot.signature {
            slot.last_probe = Instant::now();
            return Ok(Arc::clone(&slot.pack));
        }
        debug!(category = %category, "rule-pack signature changed; reloading");
    }

    let signature = pack_signature(helper_root, &category)?;
    let pack = Arc::new(read_pack(helper_root, &category)?);
    cache.insert(
        key,
        CacheSlot {
            signature,
            pack: Arc::clone(&pack),
            last_probe: Instant::now(),
        },
    );
    Ok(pack)
}

/// Drop cache entries whose category contains `filter`, or everything when
/// `filter` is `None`.
pub fn invalidate_cache(filter: Option<&str>) {
    let mut cache = CACHE.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    match filter {
        Some(fragment) => cache.retain(|(_, category), _| !category.contains(fragment)),
        None => cache.clear(),
    }
}

/// Concatenated `{path, mtime, size}` rows over the generated JSON plus
/// directory signatures of `component_db/` and `_overrides/components/`.
fn pack_signature(helper_root: &Utf8Path, category: &str) -> Result<String> {
    let mut signature = String::new();
    let generated = generated_dir(helper_root, category);
    sign_dir(&generated, &mut signature)?;
    sign_dir(&overrides_components_dir(helper_root, category), &mut signature)?;
    Ok(signature)
}

fn sign_dir(dir: &Utf8Path, signature: &mut String) -> Result<()> {
    use std::fmt::Write;
    if !dir.exists() {
        let _ = write!(signature, "{dir}:absent;");
        return Ok(());
    }
    let mut paths: Vec<Utf8PathBuf> = Vec::new();
    for entry in dir
        .read_dir_utf8()
        .with_context(|| format!("failed to read directory: {dir}"))?
    {
        paths.push(entry?.path().to_path_buf());
    }
    paths.sort();
    for path in paths {
        if path.is_dir() {
            sign_dir(&path, signature)?;
            continue;
        }
        let meta = std::fs::metadata(path.as_std_path())
            .with_context(|| format!("failed to stat: {path}"))?;
        let mtime = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos());
        let _ = write!(signature, "{path}:{mtime}:{};", meta.len());
    }
    Ok(())
}

fn read_pack(helper_root: &Utf8Path, category: &str) -> Result<RulePack> {
    let out_dir = generated_dir(helper_root, category);

    let field_rules: FieldRulesArtifact = read_json(&out_dir, "field_rules.json")?;
    let known_values: KnownValues = read_json(&out_dir, "known_values.json")?;
    let parse_templates: ParseTemplates = read_json(&out_dir, "parse_templates.json")?;
    let cross_validation: CrossValidationRules = read_json(&out_dir, "cross_validation_rules.json")?;
    let field_groups: FieldGroups = read_json(&out_dir, "field_groups.json")?;
    let key_migrations: KeyMigrations = read_json(&out_dir, "key_migrations.json")?;
    let manifest: Manifest = read_json(&out_dir, MANIFEST_FILE)?;

    let mut components = ComponentDb::default();
    let db_dir = component_db_dir(helper_root, category);
    if db_dir.exists() {
        let mut files: Vec<Utf8PathBuf> = db_dir
            .read_dir_utf8()
            .with_context(|| format!("failed to read component_db: {db_dir}"))?
            .filter_map(Result::ok)
            .map(|e| e.path().to_path_buf())
            .filter(|p| p.extension() == Some("json"))
            .collect();
        files.sort();
        for path in files {
            let raw = std::fs::read_to_string(path.as_std_path())
                .with_context(|| format!("failed to read component file: {path}"))?;
            let file: ComponentDbFile = serde_json::from_str(&raw)
                .with_context(|| format!("failed to parse component file: {path}"))?;
            for entry in file.entries {
                components.insert(&file.component_type, entry);
            }
        }
    }
    apply_overrides(helper_root, category, &mut components)?;

    Ok(RulePack {
        category: category.to_string(),
        field_rules,
        known_values,
        parse_templates,
        cross_validation,
        field_groups,
        key_migrations,
        manifest,
        components,
    })
}

fn apply_overrides(
    helper_root: &Utf8Path,
    category: &str,
    components: &mut ComponentDb,
) -> Result<()> {
    let dir = overrides_components_dir(helper_root, category);
    if !dir.exists() {
        return Ok(());
    }
    let mut files: Vec<Utf8PathBuf> = dir
        .read_dir_utf8()
        .with_context(|| format!("failed to read overrides: {dir}"))?
        .filter_map(Result::ok)
        .map(|e| e.path().to_path_buf())
        .filter(|p| p.extension() == Some("json"))
        .collect();
    files.sort();

    for path in files {
        let raw = std::fs::read_to_string(path.as_std_path())
            .with_context(|| format!("failed to read override: {path}"))?;
        let over: ComponentOverride = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse override: {path}"))?;

        let Some(token) = components
            .name_index
            .get(&fold(&over.name))
            .cloned()
            .filter(|token| {
                components
                    .entries
                    .get(token)
                    .is_some_and(|c| c.component_type == over.component_type)
            })
        else {
            debug!(file = %path, name = %over.name, "override target not found; skipped");
            continue;
        };

        let old_aliases = components.entries[&token].entry.aliases.clone();
        {
            let indexed = components.entries.get_mut(&token).expect("token resolved above");
            if let Some(props) = &over.properties {
                for (key, value) in props {
                    indexed.entry.properties.insert(key.clone(), value.clone());
                }
            }
            if let Some(name) = &over.canonical_name {
                indexed.entry.canonical_name = name.clone();
            }
            if let Some(maker) = &over.maker {
                indexed.entry.maker = maker.clone();
            }
            if let Some(links) = &over.links {
                indexed.entry.links = links.clone();
            }
            if let Some(aliases) = &over.aliases {
                indexed.entry.aliases = aliases.clone();
            }
        }
        if let Some(new_aliases) = &over.aliases {
            components.reindex_aliases(&token, &old_aliases, new_aliases);
        }
        // The canonical name must survive alias replacement even when an old
        // alias folded to the same key.
        let canonical = components.entries[&token].entry.canonical_name.clone();
        components.index_name(&canonical, &token);
    }
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(out_dir: &Utf8Path, rel_path: &str) -> Result<T> {
    let path = out_dir.join(rel_path);
    let raw = std::fs::read_to_string(path.as_std_path())
        .with_context(|| format!("missing or invalid artifact: {path}"))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse artifact: {path}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::compile;
    use tempfile::TempDir;

    fn compiled_pack(category: &str) -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let source = root.join(category).join("_source");
        std::fs::create_dir_all(source.as_std_path()).unwrap();
        std::fs::write(
            source.join("workbook_fields.json").as_std_path(),
            r#"{
                "fields": [{"key": "Sensor", "data_type": "enum"}],
                "components": {
                    "sensor": [
                        {"canonical_name": "HERO 25K", "maker": "Logitech",
                         "aliases": ["Hero25K", "HERO25K Sensor"]},
                        {"canonical_name": "Focus Pro 30K", "maker": "Razer"}
                    ]
                }
            }"#,
        )
        .unwrap();
        compile(&root, category, false).unwrap();
        (dir, root)
    }

    #[test]
    fn cache_returns_same_arc_when_unchanged() {
        let (_dir, root) = compiled_pack("mouse-cache");
        invalidate_cache(Some("mouse-cache"));

        let first = load_rule_pack(&root, "mouse-cache").unwrap();
        let second = load_rule_pack(&root, "mouse-cache").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        invalidate_cache(Some("mouse-cache"));
    }

    #[test]
    fn alias_lookup_is_case_and_whitespace_insensitive() {
        let (_dir, root) = compiled_pack("mouse-alias");
        invalidate_cache(Some("mouse-alias"));
        let pack = load_rule_pack(&root, "mouse-alias").unwrap();

        let hit = pack.components.resolve("hero 25k").unwrap();
        assert_eq!(hit.entry.maker, "Logitech");
        let hit = pack.components.resolve("HERO25KSENSOR").unwrap();
        assert_eq!(hit.entry.canonical_name, "HERO 25K");
        invalidate_cache(Some("mouse-alias"));
    }

    #[test]
    fn collision_tokens_get_suffix() {
        let mut db = ComponentDb::default();
        let entry = ComponentEntry {
            canonical_name: "PAW3395".into(),
            maker: "PixArt".into(),
            aliases: vec![],
            links: vec![],
            properties: serde_json::Map::new(),
        };
        db.insert("sensor", entry.clone());
        db.insert("sensor", entry);
        assert!(db.entries.contains_key("PAW3395::PixArt"));
        assert!(db.entries.contains_key("PAW3395::PixArt#2"));
        assert!(db.is_ambiguous("paw3395"));
    }

    #[test]
    fn overrides_patch_and_reindex() {
        let (_dir, root) = compiled_pack("mouse-over");
        let overrides = overrides_components_dir(&root, "mouse-over");
        std::fs::create_dir_all(overrides.as_std_path()).unwrap();
        std::fs::write(
            overrides.join("hero.json").as_std_path(),
            r#"{
                "component_type": "sensor",
                "name": "HERO 25K",
                "properties": {"max_dpi": 25600},
                "aliases": ["HERO 25K Gen2"]
            }"#,
        )
        .unwrap();

        invalidate_cache(Some("mouse-over"));
        let pack = load_rule_pack(&root, "mouse-over").unwrap();
        let hit = pack.components.resolve("hero 25k gen2").unwrap();
        assert_eq!(hit.entry.properties["max_dpi"], 25600);
        // Replaced alias set no longer resolves the old alias, but the
        // canonical name still does.
        assert!(pack.components.resolve("hero25k sensor").is_none());
        assert!(pack.components.resolve("HERO 25K").is_some());
        invalidate_cache(Some("mouse-over"));
    }
}
