//! Loaded kernel modules as address ranges
use crate::error::AnalysisError;
use crate::integrity::CodeRegion;
use crate::memory::{Address, Arch};
use log::{debug, info, warn};
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// One module's core region, `[base, base + size)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRange {
    pub name: String,
    #[serde(deserialize_with = "deserialize_number")]
    pub base: Address,
    #[serde(deserialize_with = "deserialize_number")]
    pub size: u64,
}

impl ModuleRange {
    pub fn new(name: &str, base: Address, size: u64) -> Self {
        ModuleRange {
            name: name.to_string(),
            base,
            size,
        }
    }

    pub fn end(&self) -> Address {
        self.base.saturating_add(self.size)
    }
}

impl CodeRegion for ModuleRange {
    fn start(&self) -> Address {
        self.base
    }

    fn end(&self) -> Address {
        ModuleRange::end(self)
    }
}

/// Read a module list: a JSON array of `{name, base, size}` for `.json` files,
/// otherwise CSV with a `name,base,size` header. Numbers may be decimal or `0x` hex.
/// The result is sorted by masked base address and free of overlaps.
pub fn load_module_list(path: &Path, arch: Arch) -> Result<Vec<ModuleRange>, AnalysisError> {
    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let mut modules: Vec<ModuleRange> = if is_json {
        serde_json::from_reader(BufReader::new(File::open(path)?))?
    } else {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_path(path)?;
        reader
            .deserialize()
            .collect::<Result<Vec<ModuleRange>, csv::Error>>()?
    };

    let modules = disjoint_ranges(modules, arch);
    for module in &modules {
        debug!(
            "Module {} at 0x{:x}-0x{:x}",
            module.name,
            module.base,
            module.end()
        );
    }
    info!("Loaded {} modules from {}", modules.len(), path.display());
    Ok(modules)
}

/// Sort by masked base, collapse repeated entries and merge overlapping ones so
/// the list can back an `AddressRangeIndex`.
pub fn disjoint_ranges(mut modules: Vec<ModuleRange>, arch: Arch) -> Vec<ModuleRange> {
    let mask = arch.address_mask();
    modules.sort_by_key(|m| (m.base & mask, m.size));

    let mut merged: Vec<ModuleRange> = Vec::with_capacity(modules.len());
    for module in modules {
        let Some(prev) = merged.last_mut() else {
            merged.push(module);
            continue;
        };
        if prev.base & mask == module.base & mask && prev.size == module.size {
            debug!(
                "Dropping repeated entry for {} at 0x{:x}",
                module.name, module.base
            );
            continue;
        }
        let prev_end = prev.end() & mask;
        if module.base & mask >= prev_end {
            merged.push(module);
            continue;
        }
        warn!(
            "Module {} (0x{:x}-0x{:x}) overlaps {} (0x{:x}-0x{:x}); merging the ranges",
            module.name,
            module.base,
            module.end(),
            prev.name,
            prev.base,
            prev.end()
        );
        let end = module.end() & mask;
        if end > prev_end {
            prev.size = prev.size.saturating_add(end - prev_end);
        }
    }
    merged
}

/// Parse `0x`-prefixed hex or decimal
pub fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim();
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    }
}

fn deserialize_number<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    struct NumberVisitor;

    impl<'de> Visitor<'de> for NumberVisitor {
        type Value = u64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an unsigned integer or a 0x-prefixed hex string")
        }

        fn visit_u64<E: de::Error>(self, value: u64) -> Result<u64, E> {
            Ok(value)
        }

        fn visit_i64<E: de::Error>(self, value: i64) -> Result<u64, E> {
            u64::try_from(value).map_err(|_| E::custom(format!("negative number {}", value)))
        }

        fn visit_str<E: de::Error>(self, value: &str) -> Result<u64, E> {
            parse_number(value).ok_or_else(|| E::custom(format!("bad number '{}'", value)))
        }
    }

    deserializer.deserialize_any(NumberVisitor)
}
