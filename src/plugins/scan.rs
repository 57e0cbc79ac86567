//! Regex scanning of import specifiers and `import.meta.hot` usage

use std::sync::LazyLock;

use regex::Regex;

use crate::server::FileMap;

static STATIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)(?:^|[;}\s])(?:import|export)\s+(?:[\w*{}\s,$]+?\s+from\s+)?["']([^"'\n]+)["']"#)
        .expect("static import pattern")
});

static DYNAMIC_IMPORT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\bimport\s*\(\s*["']([^"'\n]+)["']\s*\)"#).expect("dynamic import pattern")
});

static HOT_ACCEPT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\.meta\.hot\.(accept|acceptDeps)\s*\(\s*(?:["']([^"'\n]+)["']|\[([^\]]*)\])?"#)
        .expect("hot accept pattern")
});

static HOT_DECLINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"import\.meta\.hot\.decline\s*\(").expect("hot decline pattern"));

static QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"["']([^"'\n]+)["']"#).expect("quoted pattern"));

/// Import specifiers in source order, without duplicates
pub fn scan_imports(code: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = STATIC_IMPORT
        .captures_iter(code)
        .chain(DYNAMIC_IMPORT.captures_iter(code))
        .filter_map(|caps| caps.get(1).map(|m| (m.start(), m.as_str().to_string())))
        .collect();
    found.sort_by_key(|(pos, _)| *pos);

    let mut specifiers: Vec<String> = Vec::with_capacity(found.len());
    for (_, spec) in found {
        if !specifiers.contains(&spec) {
            specifiers.push(spec);
        }
    }
    specifiers
}

/// What a module does with its hot context
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HotApiUsage {
    pub self_accepts: bool,
    /// Specifiers passed to `accept(dep, cb)` / `acceptDeps(...)`, unresolved
    pub accepted_deps: Vec<String>,
    pub declines: bool,
}

pub fn scan_hot_api(code: &str) -> HotApiUsage {
    let mut usage = HotApiUsage {
        declines: HOT_DECLINE.is_match(code),
        ..HotApiUsage::default()
    };

    for caps in HOT_ACCEPT.captures_iter(code) {
        let deps: Vec<String> = match (caps.get(2), caps.get(3)) {
            (Some(single), _) => vec![single.as_str().to_string()],
            (None, Some(list)) => QUOTED
                .captures_iter(list.as_str())
                .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
                .collect(),
            (None, None) => Vec::new(),
        };
        if deps.is_empty() {
            if &caps[1] == "accept" {
                usage.self_accepts = true;
            }
            continue;
        }
        for dep in deps {
            if !usage.accepted_deps.contains(&dep) {
                usage.accepted_deps.push(dep);
            }
        }
    }
    usage
}

/// Resolve an import specifier against the importing module's URL.
///
/// Relative and absolute specifiers are looked up in `files` with the
/// server's probing rules. Bare (package) specifiers and misses give `None`.
pub fn resolve_import(specifier: &str, importer: &str, files: &FileMap) -> Option<String> {
    files.resolve(&join_import(specifier, importer)?)
}

/// The unprobed path a relative or absolute specifier points at, or `None`
/// for bare specifiers
pub fn join_import(specifier: &str, importer: &str) -> Option<String> {
    let path = specifier
        .split(|c: char| c == '?' || c == '#')
        .next()
        .unwrap_or(specifier);
    if path.starts_with('/') {
        Some(path.to_string())
    } else if path.starts_with("./") || path.starts_with("../") {
        Some(join_relative(importer, path))
    } else {
        None
    }
}

fn join_relative(importer: &str, relative: &str) -> String {
    let mut segments: Vec<&str> = importer.split('/').filter(|s| !s.is_empty()).collect();
    // drop the importer's file name
    segments.pop();
    for part in relative.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}
