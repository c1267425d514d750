//! Query-parameter transform URLs for image hosts that resize on request.

use url::Url;

use crate::domain::entities::TransformOptions;

/// Query parameters owned by the transform; existing values are replaced.
const TRANSFORM_PARAMS: [&str; 5] = ["width", "height", "quality", "format", "size"];

/// Returns true if `host` is one of `hosts` or a subdomain of one.
#[must_use]
pub fn is_transform_host(host: &str, hosts: &[String]) -> bool {
    let host = host.to_ascii_lowercase();
    hosts.iter().any(|h| {
        let h = h.trim().to_ascii_lowercase();
        !h.is_empty() && (host == h || host.ends_with(&format!(".{h}")))
    })
}

/// Rewrites `locator` so the image host performs the requested transform.
///
/// Locators on other hosts, non-HTTP locators and empty option sets are
/// returned unchanged. Unrelated query parameters are preserved.
#[must_use]
pub fn apply_transform(locator: &str, options: &TransformOptions, hosts: &[String]) -> String {
    if options.is_empty() || hosts.is_empty() {
        return locator.to_string();
    }

    let Ok(mut url) = Url::parse(locator) else {
        return locator.to_string();
    };
    if !matches!(url.scheme(), "http" | "https")
        || !url.host_str().is_some_and(|h| is_transform_host(h, hosts))
    {
        return locator.to_string();
    }

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRANSFORM_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let mut params: Vec<(&str, String)> = Vec::with_capacity(4);
    if let Some(format) = options.format {
        params.push(("format", format.as_str().to_string()));
    }
    if let Some(width) = options.width {
        params.push(("width", width.to_string()));
    }
    if let Some(height) = options.height {
        params.push(("height", height.to_string()));
    }
    if let Some(quality) = options.quality {
        params.push(("quality", quality.to_string()));
    }

    {
        let mut query = url.query_pairs_mut();
        query.clear();
        for (k, v) in &params {
            query.append_pair(k, v);
        }
        for (k, v) in &kept {
            query.append_pair(k, v);
        }
    }

    url.into()
}
