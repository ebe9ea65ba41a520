//! dwarf2json parser for loading Volatility 3 compatible symbol files
use crate::core::offsets::{FieldKind, FieldLayout, StructLayout};
use crate::error::AnalysisError;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;

#[derive(Debug, Deserialize)]
struct SymbolEntry {
    #[serde(default)]
    address: u64,
}

/// Type descriptor attached to a member, e.g.
/// `{"kind": "pointer", "subtype": {"kind": "function"}}`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DwarfType {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub subtype: Option<Box<DwarfType>>,
}

impl DwarfType {
    fn field_kind(&self) -> FieldKind {
        match self.kind.as_str() {
            "pointer" => match self.subtype.as_deref() {
                Some(sub) if sub.kind == "function" => FieldKind::FunctionPointer,
                _ => FieldKind::Pointer,
            },
            "struct" | "union" => match &self.name {
                Some(name) => FieldKind::Embedded(name.clone()),
                None => FieldKind::Scalar,
            },
            _ => FieldKind::Scalar,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct DwarfField {
    #[serde(default)]
    pub offset: usize,
    #[serde(rename = "type", default)]
    pub field_type: DwarfType,
}

#[derive(Debug, Deserialize)]
pub struct DwarfStruct {
    #[serde(default)]
    pub size: usize,
    #[serde(default)]
    pub fields: Option<HashMap<String, DwarfField>>,
}

#[derive(Debug, Deserialize)]
pub struct DwarfSymbols {
    #[serde(default)]
    symbols: HashMap<String, SymbolEntry>,
    #[serde(default)]
    user_types: HashMap<String, DwarfStruct>,
}

impl DwarfSymbols {
    /// Load a dwarf2json file and parse it into symbols and structures
    pub fn load_from_file(path: &std::path::Path) -> Result<Self, AnalysisError> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, AnalysisError> {
        serde_json::from_str(content)
            .map_err(|e| AnalysisError::SymbolError(format!("Failed to parse dwarf2json: {}", e)))
    }

    pub fn get_symbol_address(&self, name: &str) -> Option<u64> {
        self.symbols.get(name).map(|entry| entry.address)
    }

    /// All symbols with a non-zero address
    pub fn symbols(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.symbols
            .iter()
            .filter(|(_, entry)| entry.address != 0)
            .map(|(name, entry)| (name.as_str(), entry.address))
    }

    pub fn get_field_offset(&self, struct_name: &str, field_name: &str) -> Option<usize> {
        self.user_types
            .get(struct_name)?
            .fields
            .as_ref()?
            .get(field_name)
            .map(|field| field.offset)
    }

    /// Convert every user type into a layout usable by typed views
    pub fn struct_layouts(&self) -> impl Iterator<Item = StructLayout> + '_ {
        self.user_types.iter().map(|(name, dwarf_struct)| {
            let fields = dwarf_struct
                .fields
                .iter()
                .flatten()
                .map(|(field_name, field)| {
                    (
                        field_name.clone(),
                        FieldLayout {
                            offset: field.offset,
                            kind: field.field_type.field_kind(),
                        },
                    )
                })
                .collect();
            StructLayout::new(name, dwarf_struct.size, fields)
        })
    }
}
