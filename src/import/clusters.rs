use std::sync::LazyLock;
use regex::Regex;

// `ORTHOMCL12(3 genes,2 taxa): a(PFA) b(PBA) ...`
static CLUSTER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(ORTHOMCL[0-9]+)[^:]*:\s+(.+)").expect("valid cluster line pattern")
});

static MEMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^ ()]+)\([^)]+\)").expect("valid cluster member pattern")
});

// the last transcript, version or isoform qualifier of an id
static TRAILING_QUALIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.+)(?::[^:]*|\.\d+|\.mRNA)$").expect("valid qualifier pattern")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterLine {
    pub cluster_id: String,

    // member ids as written, evidence dropped
    pub members: Vec<String>,
}

// None for lines that do not describe a cluster
pub fn parse_cluster_line(line: &str) -> Option<ClusterLine> {
    let caps = CLUSTER_LINE.captures(line)?;
    let members = MEMBER
        .captures_iter(&caps[2])
        .map(|m| m[1].to_string())
        .collect();
    Some(ClusterLine {
        cluster_id: caps[1].to_string(),
        members: members,
    })
}

// `PF3D7_0100100.1:pep` -> `PF3D7_0100100.1`, None when there is nothing to drop
pub fn strip_qualifier(id: &str) -> Option<&str> {
    TRAILING_QUALIFIER
        .captures(id)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

// the member as written, then with one more trailing qualifier dropped each time
pub fn qualifier_variants(member: &str) -> Vec<String> {
    let mut variants = vec![member.to_string()];
    let mut id = member;
    while let Some(shorter) = strip_qualifier(id) {
        variants.push(shorter.to_string());
        id = shorter;
    }
    variants
}
