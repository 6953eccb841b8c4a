//! Helper-root filesystem layout.
//!
//! ```text
//! <helper>/<category>/_source/            workbook + seed inputs
//! <helper>/<category>/_control_plane/     workbook_map.json
//! <helper>/<category>/_generated/         the rule pack
//! <helper>/<category>/_generated/component_db/
//! <helper>/<category>/_overrides/components/
//! <helper>/<category>/_suggestions/
//! <helper>/_shared/schemas/               artifact schema overrides
//! ```

use camino::{Utf8Path, Utf8PathBuf};
use harvest_util::HarvestError;

/// Validate and normalize a category identifier: lowercase `[a-z0-9_-]`.
pub fn normalize_category(raw: &str) -> Result<String, HarvestError> {
    let token = raw.trim().to_ascii_lowercase();
    if token.is_empty()
        || !token
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(HarvestError::MissingOrInvalid(format!(
            "invalid category identifier: '{raw}'"
        )));
    }
    Ok(token)
}

#[must_use]
pub fn category_root(helper_root: &Utf8Path, category: &str) -> Utf8PathBuf {
    helper_root.join(category)
}

#[must_use]
pub fn generated_dir(helper_root: &Utf8Path, category: &str) -> Utf8PathBuf {
    category_root(helper_root, category).join("_generated")
}

#[must_use]
pub fn component_db_dir(helper_root: &Utf8Path, category: &str) -> Utf8PathBuf {
    generated_dir(helper_root, category).join("component_db")
}

#[must_use]
pub fn source_dir(helper_root: &Utf8Path, category: &str) -> Utf8PathBuf {
    category_root(helper_root, category).join("_source")
}

#[must_use]
pub fn control_plane_dir(helper_root: &Utf8Path, category: &str) -> Utf8PathBuf {
    category_root(helper_root, category).join("_control_plane")
}

#[must_use]
pub fn overrides_components_dir(helper_root: &Utf8Path, category: &str) -> Utf8PathBuf {
    category_root(helper_root, category)
        .join("_overrides")
        .join("components")
}

#[must_use]
pub fn shared_schemas_dir(helper_root: &Utf8Path) -> Utf8PathBuf {
    helper_root.join("_shared").join("schemas")
}
