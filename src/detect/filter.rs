use std::collections::HashSet;

/// Per-camera allow/deny list of detector names.
///
/// Parsed from a camera's `VLIBS` value: `RING,APRIL` allows only those
/// detectors, `!RING` allows everything except `RING`, and a bare `!` (the
/// default) allows everything.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameFilter {
    names: HashSet<String>,
    deny: bool,
}

impl NameFilter {
    pub fn parse(spec: &str) -> Self {
        let spec = spec.trim();
        let (deny, list) = match spec.strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, spec),
        };
        let names = list
            .split(',')
            .map(|entry| entry.trim().to_uppercase())
            .filter(|entry| !entry.is_empty())
            .collect();
        Self { names, deny }
    }

    pub fn allow_all() -> Self {
        Self {
            names: HashSet::new(),
            deny: true,
        }
    }

    pub fn allows(&self, name: &str) -> bool {
        self.names.contains(&name.to_uppercase()) != self.deny
    }
}

impl Default for NameFilter {
    fn default() -> Self {
        Self::allow_all()
    }
}
