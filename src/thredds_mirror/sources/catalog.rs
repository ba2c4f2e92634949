//! Catalogue loader: turns a definition's catalogue sources into the
//! per-run `dataset id → entry` mapping.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::{debug, warn};
use url::Url;

use crate::core::dataset::DatasetEntry;
use crate::core::definition::{CatalogueSource, DownloadDefinition, FilenameFilter};
use crate::sources::thredds::{Catalog, Dataset};
use crate::util::errors::MirrorResult;
use crate::util::network;

/// Loads and walks THREDDS catalogues for one definition.
///
/// Parsed catalogues are memoised on the instance, so a URL shared by
/// several sources is fetched once. Construct a fresh loader per
/// definition per run; the cache is never invalidated.
pub struct CatalogLoader {
    cache: HashMap<String, Rc<Catalog>>,
    timeout: Duration,
}

impl CatalogLoader {
    pub fn new(timeout: Duration) -> CatalogLoader {
        CatalogLoader {
            cache: HashMap::new(),
            timeout,
        }
    }

    /// Produces the mapping `dataset id → entry` across all of the
    /// definition's catalogue sources, filtered by `filter`.
    ///
    /// A source that cannot be fetched or parsed is skipped with a
    /// warning; an id collision across sources resolves to the later
    /// source. The returned map iterates in sorted dataset-id order.
    pub fn datasets(
        &mut self,
        definition: &DownloadDefinition,
        filter: &FilenameFilter,
    ) -> MirrorResult<BTreeMap<String, DatasetEntry>> {
        let mut entries = BTreeMap::new();
        for source in &definition.catalogue_urls {
            let base_url = match Url::parse(&source.catalogue_url) {
                Ok(url) => url,
                Err(e) => {
                    warn!(
                        "skipping catalogue `{}` for definition {}: {}",
                        source.catalogue_url, definition.id, e
                    );
                    continue;
                }
            };
            let catalog = match self.load(&source.catalogue_url) {
                Ok(catalog) => catalog,
                Err(e) => {
                    warn!(
                        "skipping catalogue `{}` for definition {}: {:#}",
                        source.catalogue_url, definition.id, e
                    );
                    continue;
                }
            };
            let before = entries.len();
            for dataset in &catalog.datasets {
                collect(&catalog, &base_url, source, filter, None, dataset, &mut entries);
            }
            debug!(
                "catalogue `{}` contributed {} datasets",
                source.catalogue_url,
                entries.len() - before
            );
        }
        Ok(entries)
    }

    fn load(&mut self, url: &str) -> MirrorResult<Rc<Catalog>> {
        if let Some(catalog) = self.cache.get(url) {
            return Ok(Rc::clone(catalog));
        }
        let body = fetch_catalogue(url, self.timeout)?;
        let text = String::from_utf8_lossy(&body);
        let catalog = Rc::new(Catalog::parse(&text)?);
        self.cache.insert(url.to_string(), Rc::clone(&catalog));
        Ok(catalog)
    }
}

fn fetch_catalogue(url: &str, timeout: Duration) -> MirrorResult<Vec<u8>> {
    let parsed = Url::parse(url).with_context(|| format!("invalid catalogue URL `{}`", url))?;
    match parsed.scheme() {
        "http" | "https" => network::fetch_to_memory(url, timeout),
        "file" => {
            let path = parsed
                .to_file_path()
                .map_err(|_| anyhow::format_err!("invalid file URL `{}`", url))?;
            Ok(fs::read(&path)
                .with_context(|| format!("failed to read `{}`", path.display()))?)
        }
        scheme => bail!("unsupported catalogue URL scheme `{}`", scheme),
    }
}

/// Visits one dataset node and its children. `inherited_service` carries
/// the service reference declared by enclosing datasets.
fn collect(
    catalog: &Catalog,
    base_url: &Url,
    source: &CatalogueSource,
    filter: &FilenameFilter,
    inherited_service: Option<&str>,
    dataset: &Dataset,
    out: &mut BTreeMap<String, DatasetEntry>,
) {
    let service_name = dataset.own_service_name().or(inherited_service);
    if let Some(entry) = admit(catalog, base_url, source, filter, service_name, dataset) {
        // Later sources (and later duplicates within one catalogue)
        // deliberately overwrite earlier ones.
        out.insert(entry.id.clone(), entry);
    }
    for child in &dataset.datasets {
        collect(catalog, base_url, source, filter, service_name, child, out);
    }
}

/// A dataset is admitted when it has a non-empty URL path, resolves to an
/// HTTP-file-server access URL, and passes the filename filter.
fn admit(
    catalog: &Catalog,
    base_url: &Url,
    source: &CatalogueSource,
    filter: &FilenameFilter,
    service_name: Option<&str>,
    dataset: &Dataset,
) -> Option<DatasetEntry> {
    // Explicit <access> elements take precedence over the dataset's own
    // urlPath + service reference.
    let (url_path, base) = dataset
        .access
        .iter()
        .find_map(|access| {
            let base = catalog.http_server_base(Some(&access.service_name))?;
            Some((access.url_path.as_str(), base))
        })
        .or_else(|| {
            let url_path = dataset.url_path.as_deref().filter(|p| !p.is_empty())?;
            // An explicit service reference is honoured strictly; only a
            // dataset with no reference at all falls back to the
            // catalogue's first HTTP file server.
            let base = catalog.http_server_base(service_name)?;
            Some((url_path, base))
        })?;

    let filename = url_path.rsplit('/').next().unwrap_or(url_path);
    if !filter.admits(filename) {
        return None;
    }

    let file_server_url = match access_url(base_url, base, url_path) {
        Ok(url) => url,
        Err(e) => {
            warn!("cannot build access URL for `{}`: {:#}", url_path, e);
            return None;
        }
    };

    let id = dataset
        .id
        .clone()
        .unwrap_or_else(|| url_path.to_string());
    let last_modified = dataset.modified_millis().unwrap_or_else(|| {
        debug!("dataset `{}` advertises no modified date", id);
        0
    });

    Some(DatasetEntry {
        id,
        url_path: url_path.to_string(),
        file_server_url,
        last_modified,
        size: dataset.size_bytes().unwrap_or(0),
        source: source.clone(),
    })
}

/// Resolves a service base against the catalogue URL and appends the
/// dataset's URL path.
fn access_url(catalogue_url: &Url, base: &str, url_path: &str) -> MirrorResult<Url> {
    let resolved = catalogue_url
        .join(base)
        .with_context(|| format!("invalid service base `{}`", base))?;
    let mut resolved = resolved.to_string();
    if !resolved.ends_with('/') {
        resolved.push('/');
    }
    let url = Url::parse(&resolved)?
        .join(url_path)
        .with_context(|| format!("invalid dataset URL path `{}`", url_path))?;
    Ok(url)
}
