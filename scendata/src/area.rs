//! Map areas: rectangle bounds, ownership and placed entity templates.

use std::io::Write;

use indexmap::IndexMap;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::entities::{EntityCategory, EntitySection, EntityTemplate, TemplateScope};
use crate::error::ModelError;
use crate::factions::FactionSection;
use crate::identifier::{
    process_map_keys, Authority, ContentEntity, EditContext, IdRef, Identifier,
    IdentifierRegistry, Resolution,
};
use crate::master::GridSize;
use crate::variables::VariableSection;
use crate::xml::{self, xml_err};

/// An axis-aligned map rectangle. Extent must be at least one cell in
/// each direction; overlap between rectangles is allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Result<Self, ModelError> {
        if width == 0 || height == 0 {
            return Err(ModelError::InvalidArgument(format!(
                "rectangle at ({x}, {y}) has zero extent {width}x{height}"
            )));
        }
        Ok(Rect { x, y, width, height })
    }

    pub fn x(&self) -> u32 {
        self.x
    }

    pub fn y(&self) -> u32 {
        self.y
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub(crate) fn read_xml(start: &BytesStart) -> Result<Self, ModelError> {
        Rect::new(
            xml::require_attr_u32(start, "x")?,
            xml::require_attr_u32(start, "y")?,
            xml::require_attr_u32(start, "width")?,
            xml::require_attr_u32(start, "height")?,
        )
    }

    pub(crate) fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), ModelError> {
        let mut el = BytesStart::new("bounds");
        let (x, y, w, h) = (
            self.x.to_string(),
            self.y.to_string(),
            self.width.to_string(),
            self.height.to_string(),
        );
        el.push_attribute(("x", x.as_str()));
        el.push_attribute(("y", y.as_str()));
        el.push_attribute(("width", w.as_str()));
        el.push_attribute(("height", h.as_str()));
        writer.write_event(Event::Empty(el)).map_err(xml_err)?;
        Ok(())
    }
}

/// Sibling-section context an area resolves against.
#[derive(Clone, Copy)]
pub struct AreaScope<'a> {
    pub grid: GridSize,
    pub factions: &'a FactionSection,
    pub entities: &'a EntitySection,
    pub variables: &'a VariableSection,
}

/// A map area: where it sits, who holds it, and what stands in it.
///
/// Equality deliberately ignores `bounds`: identical content placed at
/// different coordinates compares equal, which is what lets the editor
/// deduplicate content across locations. `unit_owner` names the
/// faction receiving units produced here and does participate in
/// equality, but not in emptiness.
#[derive(Debug, Clone, Default)]
pub struct Area {
    bounds: Vec<Rect>,
    owner: IdRef,
    unit_owner: IdRef,
    units: Vec<EntityTemplate>,
    terrains: Vec<EntityTemplate>,
    effects: Vec<EntityTemplate>,
}

impl Area {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bounds(&self) -> &[Rect] {
        &self.bounds
    }

    pub fn owner(&self) -> &IdRef {
        &self.owner
    }

    pub fn unit_owner(&self) -> &IdRef {
        &self.unit_owner
    }

    pub fn units(&self) -> &[EntityTemplate] {
        &self.units
    }

    pub fn terrains(&self) -> &[EntityTemplate] {
        &self.terrains
    }

    pub fn effects(&self) -> &[EntityTemplate] {
        &self.effects
    }

    pub fn push_bounds(&mut self, rect: Rect, _edit: &EditContext) {
        self.bounds.push(rect);
    }

    pub fn set_owner(&mut self, owner: Option<Identifier>, _edit: &EditContext) {
        self.owner.set(owner);
    }

    pub fn set_unit_owner(&mut self, owner: Option<Identifier>, _edit: &EditContext) {
        self.unit_owner.set(owner);
    }

    pub fn add_unit(&mut self, template: EntityTemplate, _edit: &EditContext) {
        self.units.push(template);
    }

    pub fn add_terrain(&mut self, template: EntityTemplate, _edit: &EditContext) {
        self.terrains.push(template);
    }

    pub fn add_effect(&mut self, template: EntityTemplate, _edit: &EditContext) {
        self.effects.push(template);
    }

    /// True when the area carries no content. Bounds and unit owner
    /// are ignored: a shaped but empty area is still empty.
    pub fn is_empty(&self) -> bool {
        !self.owner.is_set()
            && self.units.is_empty()
            && self.terrains.is_empty()
            && self.effects.is_empty()
    }

    fn process_list(
        list: &mut Vec<EntityTemplate>,
        old: &Identifier,
        new: Option<&Identifier>,
    ) -> usize {
        let mut count = 0;
        for template in list.iter_mut() {
            count += template.process_identifier(old, new);
        }
        // A deleted class leaves templates without a class; those
        // placements are meaningless and go with it.
        if new.is_none() {
            list.retain(|template| template.class().is_set());
        }
        count
    }

    fn validate_list(
        list: &mut Vec<EntityTemplate>,
        scope: AreaScope<'_>,
        expected: EntityCategory,
        authority: Authority,
    ) -> Result<(), ModelError> {
        let template_scope = TemplateScope {
            entities: scope.entities,
            variables: scope.variables,
            expected,
        };
        for template in list.iter_mut() {
            template.validate(template_scope, authority)?;
        }
        if expected == EntityCategory::Terrain && authority == Authority::Runtime {
            // Background terrain fills the map anyway; placements of it
            // without overrides carry no information.
            let before = list.len();
            list.retain(|template| {
                let redundant = template
                    .class()
                    .id()
                    .is_some_and(|id| scope.entities.is_background_terrain(id))
                    && template.overrides().count() == 0;
                !redundant
            });
            if before != list.len() {
                log::debug!(
                    "dropped {} redundant background terrain placement(s)",
                    before - list.len()
                );
            }
        }
        Ok(())
    }

    fn resolve_faction(
        field: &mut IdRef,
        factions: &FactionSection,
        context: &str,
        authority: Authority,
    ) -> Result<(), ModelError> {
        let Some(id) = field.id().cloned() else {
            return Ok(());
        };
        match factions.index_of(&id) {
            Some(index) => field.resolve(Resolution::Index(index)),
            None => {
                // Editor authority keeps the id in place so the user
                // can see and repair the broken reference.
                field.resolve(Resolution::Unresolved);
                if authority == Authority::Runtime {
                    return Err(ModelError::UnresolvedReference {
                        id: id.to_string(),
                        context: context.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    pub(crate) fn read_xml(
        reader: &mut Reader<&[u8]>,
        start: &BytesStart,
        empty: bool,
        registry: &mut IdentifierRegistry,
    ) -> Result<(Identifier, Self), ModelError> {
        let id = registry.intern(&xml::require_attr(start, "id")?);
        let mut area = Area::new();
        let owner = xml::attr(start, "owner")?.filter(|s| !s.is_empty());
        area.owner = owner.map(|s| IdRef::new(registry.intern(&s))).unwrap_or_default();
        let unit_owner = xml::attr(start, "unitOwner")?.filter(|s| !s.is_empty());
        area.unit_owner = unit_owner
            .map(|s| IdRef::new(registry.intern(&s)))
            .unwrap_or_default();
        if empty {
            return Ok((id, area));
        }
        loop {
            let event = reader.read_event().map_err(xml_err)?;
            match event {
                Event::Empty(ref e) | Event::Start(ref e) => {
                    let is_empty = matches!(event, Event::Empty(_));
                    match e.name().as_ref() {
                        b"bounds" => {
                            area.bounds.push(Rect::read_xml(e)?);
                            if !is_empty {
                                xml::skip_element(reader, e)?;
                            }
                        }
                        b"unit" => area
                            .units
                            .push(EntityTemplate::read_xml(reader, e, is_empty, registry)?),
                        b"terrain" => area
                            .terrains
                            .push(EntityTemplate::read_xml(reader, e, is_empty, registry)?),
                        b"effect" => area
                            .effects
                            .push(EntityTemplate::read_xml(reader, e, is_empty, registry)?),
                        other => {
                            return Err(ModelError::Parse(format!(
                                "unexpected element <{}> in <area>",
                                String::from_utf8_lossy(other)
                            )))
                        }
                    }
                }
                Event::End(e) if e.name() == start.name() => break,
                Event::Text(_) | Event::Comment(_) => {}
                Event::Eof => return Err(ModelError::Parse("unexpected end of <area>".into())),
                other => {
                    return Err(ModelError::Parse(format!(
                        "unexpected content in <area>: {other:?}"
                    )))
                }
            }
        }
        Ok((id, area))
    }

    pub(crate) fn write_xml<W: Write>(
        &self,
        writer: &mut Writer<W>,
        id: &Identifier,
    ) -> Result<(), ModelError> {
        let mut el = BytesStart::new("area");
        el.push_attribute(("id", id.as_str()));
        let owner = self.owner.id().map(|i| i.as_str()).unwrap_or("");
        el.push_attribute(("owner", owner));
        let unit_owner = self.unit_owner.id().map(|i| i.as_str()).unwrap_or("");
        el.push_attribute(("unitOwner", unit_owner));
        writer.write_event(Event::Start(el)).map_err(xml_err)?;
        for rect in &self.bounds {
            rect.write_xml(writer)?;
        }
        for template in &self.units {
            template.write_xml(writer, "unit")?;
        }
        for template in &self.terrains {
            template.write_xml(writer, "terrain")?;
        }
        for template in &self.effects {
            template.write_xml(writer, "effect")?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("area")))
            .map_err(xml_err)?;
        Ok(())
    }
}

// Bounds are excluded on purpose; see the type-level comment.
impl PartialEq for Area {
    fn eq(&self, other: &Self) -> bool {
        self.owner == other.owner
            && self.unit_owner == other.unit_owner
            && self.units == other.units
            && self.terrains == other.terrains
            && self.effects == other.effects
    }
}

impl Eq for Area {}

impl ContentEntity for Area {
    type Scope<'a> = AreaScope<'a>;

    fn process_identifier(&mut self, old: &Identifier, new: Option<&Identifier>) -> usize {
        self.owner.process_identifier(old, new)
            + self.unit_owner.process_identifier(old, new)
            + Area::process_list(&mut self.units, old, new)
            + Area::process_list(&mut self.terrains, old, new)
            + Area::process_list(&mut self.effects, old, new)
    }

    fn validate(&mut self, scope: AreaScope<'_>, authority: Authority) -> Result<(), ModelError> {
        for rect in &self.bounds {
            if !scope.grid.contains(rect) {
                if authority == Authority::Runtime {
                    return Err(ModelError::Schema(format!(
                        "bounds ({}, {}) {}x{} outside {}x{} grid",
                        rect.x(),
                        rect.y(),
                        rect.width(),
                        rect.height(),
                        scope.grid.width(),
                        scope.grid.height()
                    )));
                }
                log::warn!(
                    "area bounds ({}, {}) extend outside the map grid",
                    rect.x(),
                    rect.y()
                );
            }
        }
        Area::resolve_faction(&mut self.owner, scope.factions, "area owner", authority)?;
        Area::resolve_faction(
            &mut self.unit_owner,
            scope.factions,
            "area unit owner",
            authority,
        )?;
        Area::validate_list(&mut self.units, scope, EntityCategory::Unit, authority)?;
        Area::validate_list(&mut self.terrains, scope, EntityCategory::Terrain, authority)?;
        Area::validate_list(&mut self.effects, scope, EntityCategory::Effect, authority)?;
        Ok(())
    }
}

/// The areas section. Serialized as repeated top-level `<area id=..>`
/// elements rather than one container element.
#[derive(Debug, Default)]
pub struct AreaSection {
    areas: IndexMap<Identifier, Area>,
}

impl AreaSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Area> {
        self.areas.get(id)
    }

    pub fn areas(&self) -> impl Iterator<Item = (&Identifier, &Area)> {
        self.areas.iter()
    }

    pub fn len(&self) -> usize {
        self.areas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.areas.is_empty()
    }

    pub fn insert(
        &mut self,
        id: Identifier,
        area: Area,
        _edit: &EditContext,
    ) -> Result<(), ModelError> {
        if self.areas.contains_key(id.as_str()) {
            return Err(ModelError::DuplicateIdentifier(id.to_string()));
        }
        self.areas.insert(id, area);
        Ok(())
    }

    pub fn get_mut(&mut self, id: &str, _edit: &EditContext) -> Option<&mut Area> {
        self.areas.get_mut(id)
    }

    pub(crate) fn insert_parsed(&mut self, id: Identifier, area: Area) -> Result<(), ModelError> {
        if self.areas.contains_key(id.as_str()) {
            return Err(ModelError::DuplicateIdentifier(id.to_string()));
        }
        self.areas.insert(id, area);
        Ok(())
    }

    pub(crate) fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), ModelError> {
        for (id, area) in &self.areas {
            area.write_xml(writer, id)?;
        }
        Ok(())
    }
}

impl ContentEntity for AreaSection {
    type Scope<'a> = AreaScope<'a>;

    fn process_identifier(&mut self, old: &Identifier, new: Option<&Identifier>) -> usize {
        let mut count = 0;
        for area in self.areas.values_mut() {
            count += area.process_identifier(old, new);
        }
        count + process_map_keys(&mut self.areas, old, new, |_, _| {})
    }

    fn validate(&mut self, scope: AreaScope<'_>, authority: Authority) -> Result<(), ModelError> {
        for area in self.areas.values_mut() {
            area.validate(scope, authority)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::EntityClass;
    use crate::factions::FactionClass;

    fn edit() -> EditContext {
        EditContext::new()
    }

    fn scope_fixture() -> (FactionSection, EntitySection, VariableSection) {
        let edit = edit();
        let mut factions = FactionSection::new();
        factions
            .insert(FactionClass::new(Identifier::new("Empire"), "The Empire"), &edit)
            .unwrap();
        let mut entities = EntitySection::new();
        entities
            .insert(
                EntityClass::new(Identifier::new("spearman"), EntityCategory::Unit, "Spearman"),
                &edit,
            )
            .unwrap();
        (factions, entities, VariableSection::new())
    }

    fn populated_area() -> Area {
        let edit = edit();
        let mut area = Area::new();
        area.push_bounds(Rect::new(0, 0, 4, 4).unwrap(), &edit);
        area.set_owner(Some(Identifier::new("Empire")), &edit);
        area.add_unit(EntityTemplate::new(Identifier::new("spearman")), &edit);
        area
    }

    #[test]
    fn test_rect_rejects_zero_extent() {
        assert!(Rect::new(1, 1, 0, 3).is_err());
        assert!(Rect::new(1, 1, 3, 0).is_err());
        assert!(Rect::new(1, 1, 1, 1).is_ok());
    }

    #[test]
    fn test_equality_ignores_bounds() {
        let edit = edit();
        let a = populated_area();
        let mut b = populated_area();
        // Same content, disjoint placement.
        b.bounds.clear();
        b.push_bounds(Rect::new(20, 20, 2, 2).unwrap(), &edit);
        assert_eq!(a, b);

        // Equality laws over a small set of variants.
        let c = populated_area();
        assert_eq!(a, a);
        assert_eq!(b, a);
        assert_eq!(a, c);
        assert_eq!(b, c);

        let mut different = populated_area();
        different.set_owner(Some(Identifier::new("Horde")), &edit);
        assert_ne!(a, different);
    }

    #[test]
    fn test_is_empty_ignores_bounds_and_unit_owner() {
        let edit = edit();
        let mut area = Area::new();
        assert!(area.is_empty());
        area.push_bounds(Rect::new(0, 0, 2, 2).unwrap(), &edit);
        area.set_unit_owner(Some(Identifier::new("Empire")), &edit);
        assert!(area.is_empty());
        area.set_owner(Some(Identifier::new("Empire")), &edit);
        assert!(!area.is_empty());
    }

    #[test]
    fn test_count_matches_delete() {
        let mut area = populated_area();
        let mut copy = area.clone();
        let id = Identifier::new("Empire");

        let counted = area.process_identifier(&id, Some(&id));
        // Counting must not have changed anything.
        assert_eq!(area, copy);
        assert_eq!(area.owner().id().unwrap().as_str(), "Empire");

        let deleted = copy.process_identifier(&id, None);
        assert_eq!(counted, deleted);
        assert!(!copy.owner().is_set());
    }

    #[test]
    fn test_rename_round_trip_restores_area() {
        let mut area = populated_area();
        let original = area.clone();
        let a = Identifier::new("spearman");
        let b = Identifier::new("halberdier");

        let renamed = area.process_identifier(&a, Some(&b));
        assert_eq!(renamed, 1);
        assert_eq!(area.units()[0].class().id().unwrap().as_str(), "halberdier");

        assert_eq!(area.process_identifier(&b, Some(&a)), 1);
        assert_eq!(area, original);
    }

    #[test]
    fn test_delete_class_removes_templates() {
        let mut area = populated_area();
        let id = Identifier::new("spearman");
        assert_eq!(area.process_identifier(&id, None), 1);
        assert!(area.units().is_empty());
    }

    #[test]
    fn test_validate_runtime_rejects_dangling_owner() {
        let (factions, entities, variables) = scope_fixture();
        let scope = AreaScope {
            grid: GridSize::new(32, 32),
            factions: &factions,
            entities: &entities,
            variables: &variables,
        };

        let edit = edit();
        let mut area = populated_area();
        area.set_owner(Some(Identifier::new("Atlantis")), &edit);

        let err = area.validate(scope, Authority::Runtime).unwrap_err();
        assert!(matches!(err, ModelError::UnresolvedReference { .. }));

        // Editor mode: tolerated, owner untouched, marked unresolved.
        area.validate(scope, Authority::Editor).unwrap();
        assert_eq!(area.owner().id().unwrap().as_str(), "Atlantis");
        assert!(!area.owner().is_resolved());
    }

    #[test]
    fn test_validate_resolves_and_checks_bounds() {
        let (factions, entities, variables) = scope_fixture();
        let scope = AreaScope {
            grid: GridSize::new(8, 8),
            factions: &factions,
            entities: &entities,
            variables: &variables,
        };

        let mut area = populated_area();
        area.validate(scope, Authority::Runtime).unwrap();
        assert_eq!(area.owner().resolution(), Resolution::Index(0));
        assert_eq!(area.units()[0].class().resolution(), Resolution::Index(0));

        let edit = edit();
        area.push_bounds(Rect::new(7, 7, 4, 4).unwrap(), &edit);
        let err = area.validate(scope, Authority::Runtime).unwrap_err();
        assert!(matches!(err, ModelError::Schema(_)));
        // Editor authority only warns.
        area.validate(scope, Authority::Editor).unwrap();
    }

    #[test]
    fn test_background_terrain_pruned_at_runtime() {
        let edit = edit();
        let (factions, mut entities, variables) = scope_fixture();
        let mut grass = EntityClass::new(
            Identifier::new("grass"),
            EntityCategory::Terrain,
            "Grass",
        );
        grass.set_background(true, &edit).unwrap();
        entities.insert(grass, &edit).unwrap();

        let mut area = populated_area();
        area.add_terrain(EntityTemplate::new(Identifier::new("grass")), &edit);

        let scope = AreaScope {
            grid: GridSize::new(32, 32),
            factions: &factions,
            entities: &entities,
            variables: &variables,
        };
        area.validate(scope, Authority::Runtime).unwrap();
        assert!(area.terrains().is_empty());
    }

    #[test]
    fn test_xml_round_trip() {
        let area = populated_area();
        let id = Identifier::new("north");
        let mut writer = Writer::new(Vec::new());
        area.write_xml(&mut writer, &id).unwrap();
        let xml = String::from_utf8(writer.into_inner()).unwrap();

        let mut registry = IdentifierRegistry::new();
        let mut reader = Reader::from_str(&xml);
        reader.config_mut().trim_text(true);
        let start = match reader.read_event().unwrap() {
            Event::Start(e) => e.into_owned(),
            other => panic!("expected area start, got {other:?}"),
        };
        let (parsed_id, parsed) =
            Area::read_xml(&mut reader, &start, false, &mut registry).unwrap();

        assert_eq!(parsed_id.as_str(), "north");
        assert_eq!(parsed, area);
        assert_eq!(parsed.bounds(), area.bounds());
    }
}
