//! Variable modifiers: per-entity, per-variable delta bundles and the
//! six propagation targets they can apply to.
//!
//! A [`VariableModifier`] records how much one gameplay variable
//! changes for each [`ModifierTarget`] relative to the entity that
//! defines it. Each delta is independently present or absent — absent
//! means "no rule", an explicit zero means "authored no-op". The two
//! are gameplay-equivalent but must stay distinguishable for editing,
//! which is why storage is six `Option<i32>` fields and never a map
//! defaulting to zero.

use std::io::Write;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::ModelError;
use crate::identifier::{EditContext, Identifier, IdentifierRegistry};
use crate::variables::VariableCategory;
use crate::xml::{self, xml_err};

/// Smallest delta an authored modifier may carry.
pub const ABSOLUTE_MINIMUM: i32 = -9999;
/// Largest delta an authored modifier may carry.
pub const ABSOLUTE_MAXIMUM: i32 = 9999;

/// Propagation target of a single modifier delta.
///
/// The six targets factor into scope (self / local / ranged) crossed
/// with ownership (any owner / same owner), except that the defining
/// entity has no ownership axis of its own. Applicability is
/// conditional rather than structural: a delta for an inapplicable
/// target is defined but inert (see [`ModifierTarget::applies_to`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModifierTarget {
    /// The defining entity itself (XML name `Self`).
    Itself,
    /// The faction owning the defining entity.
    Owner,
    /// Unowned units at the defining entity's site.
    Units,
    /// Unowned units within the defining entity's modifier range.
    UnitsRanged,
    /// Same-owner units at the site. Aggregates with `Self` when the
    /// defining entity is itself a placed unit.
    OwnerUnits,
    /// Same-owner units within the modifier range.
    OwnerUnitsRanged,
}

impl ModifierTarget {
    /// All six targets, in canonical serialization order.
    pub const ALL: [ModifierTarget; 6] = [
        ModifierTarget::Itself,
        ModifierTarget::Owner,
        ModifierTarget::Units,
        ModifierTarget::UnitsRanged,
        ModifierTarget::OwnerUnits,
        ModifierTarget::OwnerUnitsRanged,
    ];

    pub fn xml_name(self) -> &'static str {
        match self {
            ModifierTarget::Itself => "Self",
            ModifierTarget::Owner => "Owner",
            ModifierTarget::Units => "Units",
            ModifierTarget::UnitsRanged => "UnitsRanged",
            ModifierTarget::OwnerUnits => "OwnerUnits",
            ModifierTarget::OwnerUnitsRanged => "OwnerUnitsRanged",
        }
    }

    pub fn from_xml_name(name: &str) -> Result<Self, ModelError> {
        match name {
            "Self" => Ok(ModifierTarget::Itself),
            "Owner" => Ok(ModifierTarget::Owner),
            "Units" => Ok(ModifierTarget::Units),
            "UnitsRanged" => Ok(ModifierTarget::UnitsRanged),
            "OwnerUnits" => Ok(ModifierTarget::OwnerUnits),
            "OwnerUnitsRanged" => Ok(ModifierTarget::OwnerUnitsRanged),
            other => Err(ModelError::InvalidArgument(format!(
                "unknown modifier target '{other}'"
            ))),
        }
    }

    /// Whether a delta for this target can take effect for a variable
    /// of `category` on an entity that is (`placed`) or is not a
    /// placement on the map.
    ///
    /// Attributes describe intrinsic properties, not possessions, so
    /// they ignore every owner-scoped target. Un-placed entities have
    /// no site or range, so every local/ranged target is inert.
    pub fn applies_to(self, category: VariableCategory, placed: bool) -> bool {
        match self {
            ModifierTarget::Itself => true,
            ModifierTarget::Owner => category != VariableCategory::Attribute,
            ModifierTarget::Units | ModifierTarget::UnitsRanged => placed,
            ModifierTarget::OwnerUnits | ModifierTarget::OwnerUnitsRanged => {
                placed && category != VariableCategory::Attribute
            }
        }
    }
}

/// The delta bundle for one (defining entity, variable) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableModifier {
    itself: Option<i32>,
    owner: Option<i32>,
    units: Option<i32>,
    units_ranged: Option<i32>,
    owner_units: Option<i32>,
    owner_units_ranged: Option<i32>,
}

impl VariableModifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, target: ModifierTarget) -> &Option<i32> {
        match target {
            ModifierTarget::Itself => &self.itself,
            ModifierTarget::Owner => &self.owner,
            ModifierTarget::Units => &self.units,
            ModifierTarget::UnitsRanged => &self.units_ranged,
            ModifierTarget::OwnerUnits => &self.owner_units,
            ModifierTarget::OwnerUnitsRanged => &self.owner_units_ranged,
        }
    }

    fn slot_mut(&mut self, target: ModifierTarget) -> &mut Option<i32> {
        match target {
            ModifierTarget::Itself => &mut self.itself,
            ModifierTarget::Owner => &mut self.owner,
            ModifierTarget::Units => &mut self.units,
            ModifierTarget::UnitsRanged => &mut self.units_ranged,
            ModifierTarget::OwnerUnits => &mut self.owner_units,
            ModifierTarget::OwnerUnitsRanged => &mut self.owner_units_ranged,
        }
    }

    /// The delta for `target`, or `None` when no rule is authored.
    pub fn get_by_target(&self, target: ModifierTarget) -> Option<i32> {
        *self.slot(target)
    }

    /// Sets or clears the delta for `target`. A present value must lie
    /// within [`ABSOLUTE_MINIMUM`]..=[`ABSOLUTE_MAXIMUM`].
    pub fn set_by_target(
        &mut self,
        target: ModifierTarget,
        value: Option<i32>,
        _edit: &EditContext,
    ) -> Result<(), ModelError> {
        self.set_raw(target, value)
    }

    /// Bounds-checked store, shared by the editor API and XML reading.
    /// Range violations are checked eagerly regardless of authority.
    pub(crate) fn set_raw(
        &mut self,
        target: ModifierTarget,
        value: Option<i32>,
    ) -> Result<(), ModelError> {
        if let Some(v) = value {
            if !(ABSOLUTE_MINIMUM..=ABSOLUTE_MAXIMUM).contains(&v) {
                return Err(ModelError::OutOfRange {
                    value: v as i64,
                    min: ABSOLUTE_MINIMUM as i64,
                    max: ABSOLUTE_MAXIMUM as i64,
                });
            }
        }
        *self.slot_mut(target) = value;
        Ok(())
    }

    /// True iff every target is absent or explicitly zero. Such a
    /// modifier carries no gameplay effect and may be pruned, but
    /// presence of individual values is preserved until then.
    pub fn is_empty(&self) -> bool {
        ModifierTarget::ALL
            .iter()
            .all(|&target| self.get_by_target(target).unwrap_or(0) == 0)
    }

    /// Reads `<modifier variable="..."> <value target="...">n</value>*`
    /// with the reader positioned just past the start tag. Returns the
    /// variable identifier the modifier attaches to.
    pub(crate) fn read_xml(
        reader: &mut Reader<&[u8]>,
        start: &BytesStart,
        registry: &mut IdentifierRegistry,
    ) -> Result<(Identifier, Self), ModelError> {
        let variable = registry.intern(&xml::require_attr(start, "variable")?);
        let mut modifier = VariableModifier::new();
        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(e) if e.name().as_ref() == b"value" => {
                    let target_name = xml::require_attr(&e, "target")?;
                    let target = ModifierTarget::from_xml_name(&target_name)?;
                    let text = xml::read_text(reader, &e)?;
                    let value = xml::parse_i32(&text, "modifier")?;
                    modifier.set_raw(target, Some(value))?;
                }
                Event::Empty(e) if e.name().as_ref() == b"value" => {
                    return Err(ModelError::Parse(
                        "<value> must contain an integer delta".into(),
                    ));
                }
                Event::End(e) if e.name() == start.name() => break,
                Event::Text(_) | Event::Comment(_) => {}
                Event::Eof => {
                    return Err(ModelError::Parse("unexpected end of <modifier>".into()))
                }
                other => {
                    return Err(ModelError::Parse(format!(
                        "unexpected content in <modifier>: {other:?}"
                    )))
                }
            }
        }
        Ok((variable, modifier))
    }

    pub(crate) fn write_xml<W: Write>(
        &self,
        writer: &mut Writer<W>,
        variable: &Identifier,
    ) -> Result<(), ModelError> {
        let mut el = BytesStart::new("modifier");
        el.push_attribute(("variable", variable.as_str()));
        writer.write_event(Event::Start(el)).map_err(xml_err)?;
        for target in ModifierTarget::ALL {
            if let Some(value) = self.get_by_target(target) {
                let mut value_el = BytesStart::new("value");
                value_el.push_attribute(("target", target.xml_name()));
                writer
                    .write_event(Event::Start(value_el))
                    .map_err(xml_err)?;
                let text = value.to_string();
                writer
                    .write_event(Event::Text(BytesText::new(&text)))
                    .map_err(xml_err)?;
                writer
                    .write_event(Event::End(BytesEnd::new("value")))
                    .map_err(xml_err)?;
            }
        }
        writer
            .write_event(Event::End(BytesEnd::new("modifier")))
            .map_err(xml_err)?;
        Ok(())
    }
}
