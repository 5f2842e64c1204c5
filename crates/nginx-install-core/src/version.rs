//! Release versions, release-page scraping and version spec resolution.
//!
//! A [`VersionSheet`] is built from the nginx.org or openresty.org download
//! page and answers "which concrete version does this spec mean". The pages
//! are scraped with a handful of patterns; nothing assumes the listing is
//! sorted.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use semver::{Prerelease, VersionReq};
use serde::{Deserialize, Serialize};

use crate::error::{InstallError, Result};

fn version_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d+)\.(\d+)\.(\d+)(?:[.-](\d+))?$").expect("static version regex")
    })
}

/// Matches release link texts such as `nginx-1.27.0`, `nginx/Windows-1.26.2`
/// or `openresty-1.25.3.1.tar.gz`.
fn link_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^.*?-(\d+\.\d+\.\d+)(\.\d+)?(?:\.tar\.gz)?$").expect("static link regex")
    })
}

fn anchor_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<a\b[^>]*>(.*?)</a>").expect("static anchor regex"))
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?is)<h1\b[^>]*>(.*?)</h1>").expect("static heading regex"))
}

fn tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("static tag regex"))
}

/// A release version: `major.minor.patch` with an optional flavor revision
/// (OpenResty's `-N`).
///
/// Ordering is semantic-version ordering; the flavor revision is a numeric
/// pre-release identifier, so `1.25.3-1 < 1.25.3-2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version(semver::Version);

impl Version {
    pub fn new(major: u64, minor: u64, patch: u64) -> Self {
        Version(semver::Version::new(major, minor, patch))
    }

    /// Attach a flavor revision (`1.25.3` -> `1.25.3-1`).
    pub fn with_flavor(mut self, revision: u64) -> Self {
        // A bare decimal is always a valid pre-release identifier.
        self.0.pre = Prerelease::new(&revision.to_string()).unwrap_or(Prerelease::EMPTY);
        self
    }

    /// Parse `1.2.3`, `1.2.3-4` or the dotted OpenResty form `1.2.3.4`.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let caps = version_re()
            .captures(s)
            .ok_or_else(|| InstallError::InvalidVersionSpec {
                spec: s.to_string(),
                reason: "expected major.minor.patch[-revision]".to_string(),
            })?;

        let num = |i: usize| -> Result<u64> {
            caps[i]
                .parse::<u64>()
                .map_err(|e| InstallError::InvalidVersionSpec {
                    spec: s.to_string(),
                    reason: e.to_string(),
                })
        };

        let version = Version::new(num(1)?, num(2)?, num(3)?);
        match caps.get(4) {
            Some(_) => Ok(version.with_flavor(num(4)?)),
            None => Ok(version),
        }
    }

    pub fn major(&self) -> u64 {
        self.0.major
    }

    pub fn minor(&self) -> u64 {
        self.0.minor
    }

    pub fn patch(&self) -> u64 {
        self.0.patch
    }

    /// The flavor revision, if any.
    pub fn flavor(&self) -> Option<u64> {
        if self.0.pre.is_empty() {
            None
        } else {
            self.0.pre.as_str().parse().ok()
        }
    }

    /// The bare `major.minor.patch` triple.
    pub fn release(&self) -> Version {
        Version::new(self.0.major, self.0.minor, self.0.patch)
    }

    /// Dotted form used by OpenResty tarballs (`1.25.3.1`).
    pub fn dotted(&self) -> String {
        match self.flavor() {
            Some(rev) => format!("{}.{}.{}.{}", self.0.major, self.0.minor, self.0.patch, rev),
            None => self.release().to_string(),
        }
    }

    fn as_semver(&self) -> &semver::Version {
        &self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Version {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self> {
        Version::parse(s)
    }
}

impl Serialize for Version {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// A parsed version spec.
#[derive(Debug, Clone, PartialEq)]
pub enum VersionSpec {
    Latest,
    Mainline,
    Stable,
    /// A full version such as `1.24.0` or `1.25.3-1`
    Exact(Version),
    /// A constraint such as `>=1.25,<1.27`, `~1.24` or a bare `1.24`
    Range(VersionReq),
}

impl VersionSpec {
    /// Parse a user supplied spec. Surrounding whitespace is ignored.
    ///
    /// A bare partial version (`1.24`) selects that release line, like `~1.24`.
    /// `==` is accepted as an alias of `=`.
    pub fn parse(spec: &str) -> Result<Self> {
        let trimmed = spec.trim();
        match trimmed {
            "" => Err(InstallError::InvalidVersionSpec {
                spec: spec.to_string(),
                reason: "empty version spec".to_string(),
            }),
            "latest" => Ok(VersionSpec::Latest),
            "mainline" => Ok(VersionSpec::Mainline),
            "stable" => Ok(VersionSpec::Stable),
            _ => {
                if let Ok(version) = Version::parse(trimmed) {
                    return Ok(VersionSpec::Exact(version));
                }

                let mut req = trimmed.replace("==", "=");
                if req.starts_with(|c: char| c.is_ascii_digit()) {
                    req.insert(0, '~');
                }

                VersionReq::parse(&req)
                    .map(VersionSpec::Range)
                    .map_err(|e| InstallError::InvalidVersionSpec {
                        spec: spec.to_string(),
                        reason: e.to_string(),
                    })
            }
        }
    }

    /// Whether `version` satisfies an exact or range spec.
    ///
    /// Range constraints are checked against the release triple, so flavor
    /// revisions never hide an OpenResty release from a range.
    /// Named specs (`latest`, `mainline`, `stable`) match nothing here.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionSpec::Exact(exact) => exact == version,
            VersionSpec::Range(req) => req.matches(version.release().as_semver()),
            VersionSpec::Latest | VersionSpec::Mainline | VersionSpec::Stable => false,
        }
    }
}

impl FromStr for VersionSpec {
    type Err = InstallError;

    fn from_str(s: &str) -> Result<Self> {
        VersionSpec::parse(s)
    }
}

/// Candidate versions scraped from a release index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionSheet {
    mainline: Version,
    stable: Version,
    legacies: BTreeSet<Version>,
}

impl VersionSheet {
    pub fn new(
        mainline: Version,
        stable: Version,
        legacies: impl IntoIterator<Item = Version>,
    ) -> Self {
        VersionSheet {
            mainline,
            stable,
            legacies: legacies.into_iter().collect(),
        }
    }

    pub fn mainline(&self) -> &Version {
        &self.mainline
    }

    pub fn stable(&self) -> &Version {
        &self.stable
    }

    pub fn legacies(&self) -> &BTreeSet<Version> {
        &self.legacies
    }

    /// `{mainline, stable} ∪ legacies`
    pub fn all(&self) -> BTreeSet<Version> {
        let mut all = self.legacies.clone();
        all.insert(self.mainline.clone());
        all.insert(self.stable.clone());
        all
    }

    pub fn latest(&self) -> Version {
        // `all` always holds at least mainline and stable.
        let mut all = self.all();
        all.pop_last().unwrap_or_else(|| self.mainline.clone())
    }

    /// Highest version satisfying `spec`.
    pub fn latest_matching(&self, spec: &VersionSpec) -> Option<Version> {
        self.all().into_iter().filter(|v| spec.matches(v)).max()
    }

    /// Resolve a spec string to a concrete version.
    pub fn resolve(&self, spec: &str) -> Result<Version> {
        match VersionSpec::parse(spec)? {
            VersionSpec::Latest => Ok(self.latest()),
            VersionSpec::Mainline => Ok(self.mainline.clone()),
            VersionSpec::Stable => Ok(self.stable.clone()),
            other => self
                .latest_matching(&other)
                .ok_or_else(|| InstallError::Resolution {
                    spec: spec.trim().to_string(),
                }),
        }
    }
}

fn strip_tags(fragment: &str) -> String {
    tag_re().replace_all(fragment, "").trim().to_string()
}

/// Link texts of a fragment, or its whitespace separated words when the
/// fragment carries no markup.
fn link_texts(fragment: &str) -> Vec<String> {
    let anchors: Vec<String> = anchor_re()
        .captures_iter(fragment)
        .map(|c| strip_tags(&c[1]))
        .collect();
    if !anchors.is_empty() {
        return anchors;
    }
    fragment.split_whitespace().map(str::to_string).collect()
}

fn version_from_link(text: &str) -> Option<Version> {
    let caps = link_re().captures(text.trim())?;
    let release = Version::parse(&caps[1]).ok()?;
    match caps.get(2) {
        Some(rev) => rev.as_str()[1..]
            .parse::<u64>()
            .ok()
            .map(|n| release.with_flavor(n)),
        None => Some(release),
    }
}

fn versions_in(fragment: &str) -> BTreeSet<Version> {
    link_texts(fragment)
        .iter()
        .filter_map(|t| version_from_link(t))
        .collect()
}

/// Parse the nginx.org download page (or a plain text rendition of it).
///
/// The page is split at the "Mainline version", "Stable version" and
/// "Legacy versions" headings, in whatever order they appear.
pub fn parse_index(document: &str) -> Result<VersionSheet> {
    const MAINLINE: &str = "Mainline version";
    const STABLE: &str = "Stable version";
    const LEGACY: &str = "Legacy versions";

    let mut marks: Vec<(usize, &str)> = [MAINLINE, STABLE, LEGACY]
        .iter()
        .filter_map(|h| document.find(h).map(|pos| (pos, *h)))
        .collect();
    marks.sort();

    let section = |heading: &str| -> Option<&str> {
        let idx = marks.iter().position(|(_, h)| *h == heading)?;
        let start = marks[idx].0 + heading.len();
        let end = marks.get(idx + 1).map(|(p, _)| *p).unwrap_or(document.len());
        Some(&document[start..end])
    };

    let pick = |heading: &str| -> Result<Version> {
        let fragment = section(heading).ok_or_else(|| InstallError::IndexParse {
            source_name: "nginx release index".to_string(),
            reason: format!("missing '{heading}' section"),
        })?;
        versions_in(fragment)
            .pop_last()
            .ok_or_else(|| InstallError::IndexParse {
                source_name: "nginx release index".to_string(),
                reason: format!("no version listed under '{heading}'"),
            })
    };

    let mainline = pick(MAINLINE)?;
    let stable = pick(STABLE)?;
    let legacies = section(LEGACY).map(versions_in).unwrap_or_default();

    Ok(VersionSheet::new(mainline, stable, legacies))
}

/// Parse the openresty.org download page.
///
/// The latest release doubles as mainline and stable.
pub fn parse_openresty_index(document: &str) -> Result<VersionSheet> {
    let parse_err = |reason: &str| InstallError::IndexParse {
        source_name: "openresty release index".to_string(),
        reason: reason.to_string(),
    };

    // openresty.org spells the anchor "lastest-release"
    let latest_at = document
        .find("id=\"lastest-release\"")
        .or_else(|| document.find("id=\"latest-release\""))
        .ok_or_else(|| parse_err("missing latest release section"))?;

    let latest = anchor_re()
        .captures(&document[latest_at..])
        .and_then(|c| version_from_link(&strip_tags(&c[1])))
        .ok_or_else(|| parse_err("no version in latest release section"))?;

    let legacies = match document.find("id=\"legacy-releases\"") {
        Some(at) => {
            let rest = &document[at..];
            let list = rest
                .find("<ul")
                .map(|start| {
                    let list = &rest[start..];
                    let end = list.find("</ul>").unwrap_or(list.len());
                    &list[..end]
                })
                .unwrap_or("");
            versions_in(list)
        }
        None => BTreeSet::new(),
    };

    Ok(VersionSheet::new(latest.clone(), latest, legacies))
}

/// Version in the first `<h1>` heading ending with `x.y.z`, as shown on a
/// GitHub "latest release" page.
pub fn parse_release_heading(document: &str) -> Option<Version> {
    static TRAILING: OnceLock<Regex> = OnceLock::new();
    let trailing = TRAILING.get_or_init(|| {
        Regex::new(r"(\d+\.\d+\.\d+)$").expect("static trailing version regex")
    });

    heading_re()
        .captures_iter(document)
        .map(|c| strip_tags(&c[1]))
        .find_map(|text| {
            trailing
                .captures(&text)
                .and_then(|c| Version::parse(&c[1]).ok())
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    fn scenario_a() -> VersionSheet {
        VersionSheet::new(v("1.27.0"), v("1.26.2"), vec![v("1.24.0"), v("1.22.1")])
    }

    #[test]
    fn test_version_parse_forms() {
        assert_eq!(v("1.26.2").to_string(), "1.26.2");
        assert_eq!(v("1.25.3-1").flavor(), Some(1));
        assert_eq!(v("1.25.3.1"), v("1.25.3-1"));
        assert_eq!(v(" 1.2.3 ").patch(), 3);
        assert!(Version::parse("1.2").is_err());
        assert!(Version::parse("nginx").is_err());
    }

    #[test]
    fn test_version_ordering_is_semantic() {
        assert!(v("1.10.0") > v("1.9.15"));
        assert!(v("1.25.3-2") > v("1.25.3-1"));
        assert!(v("1.25.3-1") < v("1.25.3"));
        assert!(v("1.9.7-2") <= v("1.9.7-2"));
    }

    #[test]
    fn test_dotted_form() {
        assert_eq!(v("1.25.3-1").dotted(), "1.25.3.1");
        assert_eq!(v("1.27.0").dotted(), "1.27.0");
    }

    #[test]
    fn test_scenario_a_named_specs() {
        let sheet = scenario_a();
        assert_eq!(sheet.resolve("stable").unwrap(), v("1.26.2"));
        assert_eq!(sheet.resolve("latest").unwrap(), v("1.27.0"));
        assert_eq!(sheet.resolve("mainline").unwrap(), v("1.27.0"));
    }

    #[test]
    fn test_scenario_a_range() {
        let sheet = scenario_a();
        assert_eq!(sheet.resolve(">=1.25,<1.27").unwrap(), v("1.26.2"));
        assert_eq!(sheet.resolve("  >=1.25, <1.27 ").unwrap(), v("1.26.2"));
    }

    #[test]
    fn test_latest_ignores_listing_order() {
        // stable newer than mainline and a legacy newer than both
        let sheet = VersionSheet::new(v("1.25.0"), v("1.26.0"), vec![v("1.27.1"), v("1.2.0")]);
        assert_eq!(sheet.latest(), v("1.27.1"));
        assert_eq!(sheet.resolve("mainline").unwrap(), v("1.25.0"));
        assert_eq!(sheet.resolve("<1.27").unwrap(), v("1.26.0"));
    }

    #[test]
    fn test_exact_and_bare_partial_specs() {
        let sheet = scenario_a();
        assert_eq!(sheet.resolve("1.24.0").unwrap(), v("1.24.0"));
        assert_eq!(sheet.resolve("==1.22.1").unwrap(), v("1.22.1"));
        assert_eq!(sheet.resolve("1.24").unwrap(), v("1.24.0"));
    }

    #[test]
    fn test_no_match_is_resolution_error() {
        let err = scenario_a().resolve(">=2.0").unwrap_err();
        assert!(matches!(err, InstallError::Resolution { .. }));
    }

    #[test]
    fn test_empty_or_garbage_spec_is_invalid() {
        assert!(matches!(
            scenario_a().resolve("   ").unwrap_err(),
            InstallError::InvalidVersionSpec { .. }
        ));
        assert!(matches!(
            scenario_a().resolve(">>nope").unwrap_err(),
            InstallError::InvalidVersionSpec { .. }
        ));
    }

    #[test]
    fn test_range_matches_flavored_release() {
        let spec = VersionSpec::parse(">=1.25").unwrap();
        assert!(spec.matches(&v("1.25.3-1")));
        assert!(!spec.matches(&v("1.21.4-3")));
    }

    const NGINX_PAGE: &str = r#"
<h4>Mainline version</h4>
<table width="100%">
<tr><td width="20%"><a href="/en/CHANGES">CHANGES</a></td>
<td width="20%"><a href="/download/nginx-1.27.0.tar.gz">nginx-1.27.0</a>
<a href="/download/nginx-1.27.0.tar.gz.asc">pgp</a></td>
<td width="20%"><a href="/download/nginx-1.27.0.zip">nginx/Windows-1.27.0</a></td></tr>
</table>
<h4>Stable version</h4>
<table width="100%">
<tr><td><a href="/download/nginx-1.26.2.tar.gz">nginx-1.26.2</a></td></tr>
</table>
<h4>Legacy versions</h4>
<table width="100%">
<tr><td><a href="/download/nginx-1.22.1.tar.gz">nginx-1.22.1</a></td></tr>
<tr><td><a href="/download/nginx-1.24.0.tar.gz">nginx-1.24.0</a></td></tr>
</table>
"#;

    #[test]
    fn test_parse_nginx_index() {
        let sheet = parse_index(NGINX_PAGE).unwrap();
        assert_eq!(sheet.mainline(), &v("1.27.0"));
        assert_eq!(sheet.stable(), &v("1.26.2"));
        assert!(sheet.legacies().contains(&v("1.24.0")));
        assert!(sheet.legacies().contains(&v("1.22.1")));
        assert_eq!(sheet.all().len(), 4);
    }

    #[test]
    fn test_parse_nginx_index_plain_text() {
        let text = "Legacy versions nginx-1.20.2 nginx-1.18.0\n\
                    Stable version nginx-1.26.2\n\
                    Mainline version nginx-1.27.0";
        let sheet = parse_index(text).unwrap();
        assert_eq!(sheet.mainline(), &v("1.27.0"));
        assert_eq!(sheet.stable(), &v("1.26.2"));
        assert_eq!(sheet.legacies().len(), 2);
    }

    #[test]
    fn test_parse_nginx_index_missing_section() {
        let err = parse_index("<h4>Mainline version</h4> nginx-1.27.0").unwrap_err();
        assert!(matches!(err, InstallError::IndexParse { .. }));
    }

    #[test]
    fn test_parse_openresty_index() {
        let page = r#"
<h2 id="lastest-release">Lastest release</h2>
<ul><li><a href="/download/openresty-1.25.3.2.tar.gz">openresty-1.25.3.2.tar.gz</a></li></ul>
<h2 id="legacy-releases">Legacy releases</h2>
<ul>
<li><a href="/download/openresty-1.21.4.3.tar.gz">openresty-1.21.4.3.tar.gz</a></li>
<li><a href="/download/openresty-1.25.3.1.tar.gz">openresty-1.25.3.1.tar.gz</a></li>
<li><a href="/download/ngx_openresty-1.9.7.1.tar.gz">ngx_openresty-1.9.7.1.tar.gz</a></li>
</ul>
<ul><li><a href="/download/openresty-9.9.9.9.tar.gz">not a legacy</a></li></ul>
"#;
        let sheet = parse_openresty_index(page).unwrap();
        assert_eq!(sheet.mainline(), &v("1.25.3-2"));
        assert_eq!(sheet.stable(), &v("1.25.3-2"));
        assert_eq!(sheet.legacies().len(), 3);
        assert!(sheet.legacies().contains(&v("1.9.7-1")));
        assert_eq!(sheet.resolve(">=1.21,<1.25").unwrap(), v("1.21.4-3"));
    }

    #[test]
    fn test_parse_release_heading() {
        let page = r#"<h1 class="d-inline">Release notes</h1>
<h1 data-view-component="true" class="d-inline mr-3">OpenSSL 3.3.1</h1>"#;
        assert_eq!(parse_release_heading(page), Some(v("3.3.1")));
        assert_eq!(parse_release_heading("<h1>1.10.0</h1>"), Some(v("1.10.0")));
        assert_eq!(parse_release_heading("<p>3.3.1</p>"), None);
    }
}
