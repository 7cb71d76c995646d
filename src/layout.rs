//! Slot naming from solc `storageLayout` output.
//!
//! Only statically placed slots can be named: plain variables, struct members,
//! static array elements and the base slot of dynamic arrays and strings.
//! Slots derived through keccak (mapping values, dynamic array data) stay
//! anonymous.

use crate::error::ConfigError;
use crate::storage::SlotMetadata;
use alloy::primitives::{Address, B256, U256};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

/// Upper bound on slots enumerated for a single static array.
const MAX_ARRAY_SLOTS: u64 = 65_536;

#[derive(Debug, Deserialize)]
struct SolcLayout {
    #[serde(default)]
    storage: Vec<SolcVariable>,
    #[serde(default)]
    types: Option<HashMap<String, SolcType>>,
}

#[derive(Debug, Clone, Deserialize)]
struct SolcVariable {
    label: String,
    slot: String,
    #[serde(rename = "type")]
    type_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SolcType {
    encoding: String,
    label: String,
    number_of_bytes: String,
    #[serde(default)]
    members: Option<Vec<SolcVariable>>,
    #[serde(default)]
    base: Option<String>,
}

#[derive(Debug, Clone)]
struct Placement {
    root: String,
    path: Vec<String>,
    index: Option<u64>,
}

impl Placement {
    fn metadata(&self) -> SlotMetadata {
        SlotMetadata {
            variable_name: Some(self.root.clone()),
            key: self.index.map(|i| i.to_string()),
            deep_key: (self.path.len() > 1).then(|| self.path.join(".")),
            struct_var: self.path.last().cloned(),
        }
    }

    fn member(&self, label: &str) -> Self {
        let mut path = self.path.clone();
        path.push(label.to_string());
        Self {
            root: self.root.clone(),
            path,
            index: self.index,
        }
    }

    fn element(&self, index: u64) -> Self {
        Self {
            root: self.root.clone(),
            path: self.path.clone(),
            index: Some(index),
        }
    }
}

/// Slot → metadata table for one contract.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageLayout {
    slots: BTreeMap<B256, SlotMetadata>,
}

impl StorageLayout {
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let parsed: SolcLayout = serde_json::from_str(raw)
            .map_err(|e| ConfigError::Invalid(format!("storage layout is not valid JSON: {e}")))?;
        let types = parsed.types.unwrap_or_default();
        let mut layout = Self::default();
        for variable in &parsed.storage {
            let base = parse_decimal(&variable.slot)?;
            let placement = Placement {
                root: variable.label.clone(),
                path: Vec::new(),
                index: None,
            };
            layout.place(&types, &variable.type_id, base, &placement)?;
        }
        Ok(layout)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::Invalid(format!("cannot read storage layout {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn metadata_for(&self, slot: &B256) -> Option<&SlotMetadata> {
        self.slots.get(slot)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn place(
        &mut self,
        types: &HashMap<String, SolcType>,
        type_id: &str,
        slot: U256,
        placement: &Placement,
    ) -> Result<(), ConfigError> {
        let Some(ty) = types.get(type_id) else {
            self.annotate(slot, placement);
            return Ok(());
        };
        match ty.encoding.as_str() {
            "mapping" => Ok(()),
            "dynamic_array" | "bytes" => {
                self.annotate(slot, placement);
                Ok(())
            }
            "inplace" => {
                if let Some(members) = &ty.members {
                    for member in members {
                        let member_slot = offset_slot(slot, parse_decimal(&member.slot)?, &ty.label)?;
                        self.place(types, &member.type_id, member_slot, &placement.member(&member.label))?;
                    }
                    return Ok(());
                }
                if let Some(base) = &ty.base {
                    return self.place_static_array(types, ty, base, slot, placement);
                }
                self.annotate(slot, placement);
                Ok(())
            }
            other => Err(ConfigError::Invalid(format!(
                "unsupported storage encoding `{other}` for `{}`",
                ty.label
            ))),
        }
    }

    fn place_static_array(
        &mut self,
        types: &HashMap<String, SolcType>,
        array: &SolcType,
        base: &str,
        slot: U256,
        placement: &Placement,
    ) -> Result<(), ConfigError> {
        let total_bytes = parse_decimal(&array.number_of_bytes)?.saturating_to::<u64>();
        let element_bytes = types
            .get(base)
            .map(|t| parse_decimal(&t.number_of_bytes))
            .transpose()?
            .map(|n| n.saturating_to::<u64>())
            .unwrap_or(32)
            .max(1);

        if element_bytes >= 32 {
            let slots_per_element = element_bytes.div_ceil(32);
            let element_span = slots_per_element.checked_mul(32).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "storage layout element size {element_bytes} of `{}` is out of range",
                    array.label
                ))
            })?;
            let length = (total_bytes / element_span).min(MAX_ARRAY_SLOTS / slots_per_element);
            for index in 0..length {
                let element_slot = offset_slot(
                    slot,
                    U256::from(index) * U256::from(slots_per_element),
                    &array.label,
                )?;
                self.place(types, base, element_slot, &placement.element(index))?;
            }
            return Ok(());
        }

        let per_slot = 32 / element_bytes;
        let length = array_length(&array.label).unwrap_or(total_bytes / element_bytes);
        let slot_count = length.div_ceil(per_slot).min(MAX_ARRAY_SLOTS);
        for offset in 0..slot_count {
            let element_slot = offset_slot(slot, U256::from(offset), &array.label)?;
            self.annotate(element_slot, &placement.element(offset * per_slot));
        }
        Ok(())
    }

    fn annotate(&mut self, slot: U256, placement: &Placement) {
        let key = B256::from(slot.to_be_bytes::<32>());
        let incoming = placement.metadata();
        match self.slots.get_mut(&key) {
            None => {
                self.slots.insert(key, incoming);
            }
            // Packed variables share a slot.
            Some(existing) => {
                if existing.variable_name == incoming.variable_name {
                    join_label(&mut existing.struct_var, incoming.struct_var);
                    join_label(&mut existing.deep_key, incoming.deep_key);
                } else {
                    join_label(&mut existing.variable_name, incoming.variable_name);
                }
            }
        }
    }
}

fn join_label(existing: &mut Option<String>, incoming: Option<String>) {
    let Some(next) = incoming else {
        return;
    };
    match existing {
        Some(current) => {
            current.push(',');
            current.push_str(&next);
        }
        None => *existing = Some(next),
    }
}

/// `slot + delta`, rejecting placements past the last storage slot.
fn offset_slot(slot: U256, delta: U256, label: &str) -> Result<U256, ConfigError> {
    slot.checked_add(delta).ok_or_else(|| {
        ConfigError::Invalid(format!("storage layout for `{label}` runs past the last slot"))
    })
}

fn parse_decimal(raw: &str) -> Result<U256, ConfigError> {
    U256::from_str_radix(raw.trim(), 10)
        .map_err(|e| ConfigError::Invalid(format!("storage layout number `{raw}`: {e}")))
}

/// Length of the outermost static dimension, e.g. `uint8[10]` → 10.
fn array_length(label: &str) -> Option<u64> {
    let open = label.rfind('[')?;
    let close = label.rfind(']')?;
    label.get(open + 1..close)?.parse().ok()
}

/// Layouts keyed by contract address.
#[derive(Debug, Clone, Default)]
pub struct LayoutRegistry {
    layouts: HashMap<Address, StorageLayout>,
}

impl LayoutRegistry {
    pub fn insert(&mut self, contract: Address, layout: StorageLayout) {
        self.layouts.insert(contract, layout);
    }

    pub fn metadata_for(&self, contract: &Address, slot: &B256) -> SlotMetadata {
        self.layouts
            .get(contract)
            .and_then(|layout| layout.metadata_for(slot))
            .cloned()
            .unwrap_or_default()
    }
}
