//! Config URL migration.
//!
//! Images picked in the admin UI before their first sync are stored as
//! proxy URLs (`/api/image?id=<fileId>`). Once a pass has produced a local
//! derivative for that id the config entry is pointed at it instead, the
//! cover derivative winning over the catalog one.

use core_runtime::config::AppConfig;
use std::collections::HashMap;

/// File id carried in the `id=` query parameter of `url`.
pub fn proxied_file_id(url: &str) -> Option<&str> {
    let (_, query) = url.split_once('?')?;
    query
        .split('&')
        .find_map(|pair| pair.strip_prefix("id="))
        .map(|id| id.split('#').next().unwrap_or(id))
        .filter(|id| !id.is_empty())
}

fn resolve(
    url: &str,
    cover_refs: &HashMap<String, String>,
    catalog_refs: &HashMap<String, String>,
) -> Option<String> {
    let file_id = proxied_file_id(url)?;
    cover_refs
        .get(file_id)
        .or_else(|| catalog_refs.get(file_id))
        .cloned()
}

fn migrate_field(
    field: &mut Option<String>,
    cover_refs: &HashMap<String, String>,
    catalog_refs: &HashMap<String, String>,
) -> bool {
    let Some(local) = field
        .as_deref()
        .and_then(|url| resolve(url, cover_refs, catalog_refs))
    else {
        return false;
    };
    *field = Some(local);
    true
}

/// Rewrite every proxied image URL in `config` that now has a local
/// derivative. Returns how many fields changed.
pub fn migrate_config_urls(
    config: &mut AppConfig,
    cover_refs: &HashMap<String, String>,
    catalog_refs: &HashMap<String, String>,
) -> usize {
    let mut changed = 0;

    for url in config.folder_covers.values_mut() {
        if let Some(local) = resolve(url, cover_refs, catalog_refs) {
            *url = local;
            changed += 1;
        }
    }

    for field in [
        &mut config.background_image,
        &mut config.favicon,
        &mut config.og_image,
        &mut config.seasonal_custom_icon,
    ] {
        if migrate_field(field, cover_refs, catalog_refs) {
            changed += 1;
        }
    }

    changed
}
