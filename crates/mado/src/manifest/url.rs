use url::Url;

use crate::MadoResult;

pub(crate) fn is_absolute_url(s: &str) -> bool {
    s.starts_with("http://")
        || s.starts_with("https://")
        || s.starts_with("file://")
        || s.starts_with("ftp://")
}

/// Resolves a BaseURL or template against the URL of its parent element.
///
/// The query of `current` is carried over unless `new` brings its own:
///
/// merge_baseurls(https://example.com/manifest.mpd?auth=secret, /video42.mp4) =>
///   https://example.com/video42.mp4?auth=secret
pub(crate) fn merge_baseurls(current: &Url, new: &str) -> MadoResult<Url> {
    if is_absolute_url(new) {
        Ok(Url::parse(new)?)
    } else {
        let mut merged = current.join(new)?;
        if merged.query().is_none() {
            merged.set_query(current.query());
        }
        Ok(merged)
    }
}

/// Applies the first `BaseURL` of an element, if any.
pub(crate) fn apply_base_url(current: &Url, base_urls: &[dash_mpd::BaseURL]) -> MadoResult<Url> {
    match base_urls.first() {
        Some(base) => merge_baseurls(current, &base.base),
        None => Ok(current.clone()),
    }
}
