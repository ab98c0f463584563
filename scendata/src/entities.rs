//! Entity classes (unit / terrain / effect / upgrade definitions) and
//! entity templates (placements of a class inside an area).

use std::io::Write;

use indexmap::IndexMap;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::ModelError;
use crate::identifier::{
    process_map_keys, Authority, ContentEntity, EditContext, IdRef, Identifier,
    IdentifierRegistry, Resolution,
};
use crate::modifier::VariableModifier;
use crate::variables::VariableSection;
use crate::xml::{self, xml_err};

/// The closed set of entity categories. Immutable per class after
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityCategory {
    Unit,
    Terrain,
    Effect,
    Upgrade,
}

impl EntityCategory {
    pub const ALL: [EntityCategory; 4] = [
        EntityCategory::Unit,
        EntityCategory::Terrain,
        EntityCategory::Effect,
        EntityCategory::Upgrade,
    ];

    pub fn xml_name(self) -> &'static str {
        match self {
            EntityCategory::Unit => "unit",
            EntityCategory::Terrain => "terrain",
            EntityCategory::Effect => "effect",
            EntityCategory::Upgrade => "upgrade",
        }
    }

    pub fn from_xml_name(name: &str) -> Option<Self> {
        match name {
            "unit" => Some(EntityCategory::Unit),
            "terrain" => Some(EntityCategory::Terrain),
            "effect" => Some(EntityCategory::Effect),
            "upgrade" => Some(EntityCategory::Upgrade),
            _ => None,
        }
    }
}

/// A category-tagged entity definition with its base modifiers, one
/// per variable.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityClass {
    id: Identifier,
    category: EntityCategory,
    display_name: String,
    background: bool,
    modifiers: IndexMap<Identifier, VariableModifier>,
}

impl EntityClass {
    pub fn new(id: Identifier, category: EntityCategory, display_name: &str) -> Self {
        EntityClass {
            id,
            category,
            display_name: display_name.to_string(),
            background: false,
            modifiers: IndexMap::new(),
        }
    }

    pub fn id(&self) -> &Identifier {
        &self.id
    }

    pub fn category(&self) -> EntityCategory {
        self.category
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Background terrain fills the map by default; placements of it
    /// that add nothing can be dropped at validation time.
    pub fn is_background(&self) -> bool {
        self.background
    }

    pub fn set_background(&mut self, background: bool, _edit: &EditContext) -> Result<(), ModelError> {
        if self.category != EntityCategory::Terrain {
            return Err(ModelError::InvalidArgument(format!(
                "background flag only applies to terrain, '{}' is a {:?}",
                self.id, self.category
            )));
        }
        self.background = background;
        Ok(())
    }

    /// The base modifier this class defines for `variable`, if any.
    pub fn get_modifier(&self, variable: &str) -> Option<&VariableModifier> {
        self.modifiers.get(variable)
    }

    pub fn modifiers(&self) -> impl Iterator<Item = (&Identifier, &VariableModifier)> {
        self.modifiers.iter()
    }

    pub fn set_modifier(
        &mut self,
        variable: Identifier,
        modifier: VariableModifier,
        _edit: &EditContext,
    ) {
        self.modifiers.insert(variable, modifier);
    }

    /// Drops modifiers that carry no gameplay effect. Returns how many
    /// were removed.
    pub fn prune_empty_modifiers(&mut self, _edit: &EditContext) -> usize {
        let before = self.modifiers.len();
        self.modifiers.retain(|_, m| !m.is_empty());
        before - self.modifiers.len()
    }

    fn read_body(
        &mut self,
        reader: &mut Reader<&[u8]>,
        end_name: &[u8],
        registry: &mut IdentifierRegistry,
    ) -> Result<(), ModelError> {
        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(e) if e.name().as_ref() == b"modifier" => {
                    let (variable, modifier) =
                        VariableModifier::read_xml(reader, &e, registry)?;
                    self.modifiers.insert(variable, modifier);
                }
                Event::End(e) if e.name().as_ref() == end_name => break,
                Event::Text(_) | Event::Comment(_) => {}
                Event::Eof => {
                    return Err(ModelError::Parse(format!(
                        "unexpected end of <{}>",
                        String::from_utf8_lossy(end_name)
                    )))
                }
                other => {
                    return Err(ModelError::Parse(format!(
                        "unexpected content in entity class: {other:?}"
                    )))
                }
            }
        }
        Ok(())
    }

    fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), ModelError> {
        let name = self.category.xml_name();
        let mut el = BytesStart::new(name);
        el.push_attribute(("id", self.id.as_str()));
        el.push_attribute(("name", self.display_name.as_str()));
        if self.background {
            el.push_attribute(("background", "true"));
        }
        if self.modifiers.is_empty() {
            writer.write_event(Event::Empty(el)).map_err(xml_err)?;
            return Ok(());
        }
        writer.write_event(Event::Start(el)).map_err(xml_err)?;
        for (variable, modifier) in &self.modifiers {
            modifier.write_xml(writer, variable)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_err)?;
        Ok(())
    }
}

impl ContentEntity for EntityClass {
    type Scope<'a> = &'a VariableSection;

    fn process_identifier(&mut self, old: &Identifier, new: Option<&Identifier>) -> usize {
        // The class's own id is handled by the owning section together
        // with the dictionary key; only variable references live here.
        process_map_keys(&mut self.modifiers, old, new, |_, _| {})
    }

    fn validate(
        &mut self,
        variables: &VariableSection,
        authority: Authority,
    ) -> Result<(), ModelError> {
        for variable in self.modifiers.keys() {
            if variables.get_variable(variable).is_none() {
                if authority == Authority::Runtime {
                    return Err(ModelError::UnresolvedReference {
                        id: variable.to_string(),
                        context: format!("modifiers of entity class '{}'", self.id),
                    });
                }
                log::debug!(
                    "entity class '{}' keeps modifier for unknown variable '{}'",
                    self.id,
                    variable
                );
            }
        }
        Ok(())
    }
}

/// A placement of an entity class inside an area, carrying modifier
/// overrides that shadow the class's base modifiers per variable.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityTemplate {
    class: IdRef,
    modifiers: IndexMap<Identifier, VariableModifier>,
}

impl EntityTemplate {
    pub fn new(class_id: Identifier) -> Self {
        EntityTemplate {
            class: IdRef::new(class_id),
            modifiers: IndexMap::new(),
        }
    }

    pub fn class(&self) -> &IdRef {
        &self.class
    }

    pub fn override_modifier(&self, variable: &str) -> Option<&VariableModifier> {
        self.modifiers.get(variable)
    }

    pub fn overrides(&self) -> impl Iterator<Item = (&Identifier, &VariableModifier)> {
        self.modifiers.iter()
    }

    pub fn set_override(
        &mut self,
        variable: Identifier,
        modifier: VariableModifier,
        _edit: &EditContext,
    ) {
        self.modifiers.insert(variable, modifier);
    }

    /// The modifier in force for `variable`: the template override if
    /// one exists, else the class's base modifier.
    pub fn effective_modifier<'a>(
        &'a self,
        variable: &str,
        class: &'a EntityClass,
    ) -> Option<&'a VariableModifier> {
        self.modifiers
            .get(variable)
            .or_else(|| class.get_modifier(variable))
    }

    pub(crate) fn read_xml(
        reader: &mut Reader<&[u8]>,
        start: &BytesStart,
        empty: bool,
        registry: &mut IdentifierRegistry,
    ) -> Result<Self, ModelError> {
        let class_id = registry.intern(&xml::require_attr(start, "class")?);
        let mut template = EntityTemplate::new(class_id);
        if empty {
            return Ok(template);
        }
        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(e) if e.name().as_ref() == b"modifier" => {
                    let (variable, modifier) =
                        VariableModifier::read_xml(reader, &e, registry)?;
                    template.modifiers.insert(variable, modifier);
                }
                Event::End(e) if e.name() == start.name() => break,
                Event::Text(_) | Event::Comment(_) => {}
                Event::Eof => {
                    return Err(ModelError::Parse("unexpected end of entity template".into()))
                }
                other => {
                    return Err(ModelError::Parse(format!(
                        "unexpected content in entity template: {other:?}"
                    )))
                }
            }
        }
        Ok(template)
    }

    pub(crate) fn write_xml<W: Write>(
        &self,
        writer: &mut Writer<W>,
        element: &str,
    ) -> Result<(), ModelError> {
        let mut el = BytesStart::new(element);
        if let Some(class) = self.class.id() {
            el.push_attribute(("class", class.as_str()));
        }
        if self.modifiers.is_empty() {
            writer.write_event(Event::Empty(el)).map_err(xml_err)?;
            return Ok(());
        }
        writer.write_event(Event::Start(el)).map_err(xml_err)?;
        for (variable, modifier) in &self.modifiers {
            modifier.write_xml(writer, variable)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new(element)))
            .map_err(xml_err)?;
        Ok(())
    }
}

/// Sibling-section context a template resolves against.
#[derive(Clone, Copy)]
pub struct TemplateScope<'a> {
    pub entities: &'a EntitySection,
    pub variables: &'a VariableSection,
    /// The category the containing list expects (units / terrains /
    /// effects).
    pub expected: EntityCategory,
}

impl ContentEntity for EntityTemplate {
    type Scope<'a> = TemplateScope<'a>;

    fn process_identifier(&mut self, old: &Identifier, new: Option<&Identifier>) -> usize {
        self.class.process_identifier(old, new)
            + process_map_keys(&mut self.modifiers, old, new, |_, _| {})
    }

    fn validate(
        &mut self,
        scope: TemplateScope<'_>,
        authority: Authority,
    ) -> Result<(), ModelError> {
        match self.class.id().cloned() {
            None => {
                if authority == Authority::Runtime {
                    return Err(ModelError::Schema(
                        "entity template has no class".into(),
                    ));
                }
            }
            Some(class_id) => match scope.entities.index_of(&class_id) {
                Some(index) => {
                    let class = scope.entities.get_index(index).expect("index from lookup");
                    if class.category() != scope.expected {
                        if authority == Authority::Runtime {
                            return Err(ModelError::Schema(format!(
                                "template of class '{}' is a {:?} but was placed in a {:?} list",
                                class_id,
                                class.category(),
                                scope.expected
                            )));
                        }
                        log::warn!(
                            "template of class '{}' is a {:?} in a {:?} list",
                            class_id,
                            class.category(),
                            scope.expected
                        );
                    }
                    self.class.resolve(Resolution::Index(index));
                }
                None => {
                    self.class.resolve(Resolution::Unresolved);
                    if authority == Authority::Runtime {
                        return Err(ModelError::UnresolvedReference {
                            id: class_id.to_string(),
                            context: "entity template class".into(),
                        });
                    }
                }
            },
        }
        for variable in self.modifiers.keys() {
            if scope.variables.get_variable(variable).is_none()
                && authority == Authority::Runtime
            {
                return Err(ModelError::UnresolvedReference {
                    id: variable.to_string(),
                    context: "entity template modifiers".into(),
                });
            }
        }
        Ok(())
    }
}

/// The entities section (XML name `rules`): the dictionary of entity
/// class definitions.
#[derive(Debug, Default)]
pub struct EntitySection {
    classes: IndexMap<Identifier, EntityClass>,
}

impl EntitySection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&EntityClass> {
        self.classes.get(id)
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.classes.get_index_of(id)
    }

    pub fn get_index(&self, index: usize) -> Option<&EntityClass> {
        self.classes.get_index(index).map(|(_, class)| class)
    }

    pub fn classes(&self) -> impl Iterator<Item = &EntityClass> {
        self.classes.values()
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    pub fn insert(&mut self, class: EntityClass, _edit: &EditContext) -> Result<(), ModelError> {
        if self.classes.contains_key(class.id.as_str()) {
            return Err(ModelError::DuplicateIdentifier(class.id.to_string()));
        }
        self.classes.insert(class.id.clone(), class);
        Ok(())
    }

    pub fn get_mut(&mut self, id: &str, _edit: &EditContext) -> Option<&mut EntityClass> {
        self.classes.get_mut(id)
    }

    /// Part of the template-validator collaborator contract: whether
    /// `id` names background terrain.
    pub fn is_background_terrain(&self, id: &str) -> bool {
        self.classes
            .get(id)
            .is_some_and(|class| class.category() == EntityCategory::Terrain && class.is_background())
    }

    /// Reads the body of a `<rules>` element.
    pub(crate) fn read_xml(
        &mut self,
        reader: &mut Reader<&[u8]>,
        registry: &mut IdentifierRegistry,
    ) -> Result<(), ModelError> {
        loop {
            let event = reader.read_event().map_err(xml_err)?;
            match event {
                Event::Empty(ref e) | Event::Start(ref e) => {
                    let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    let category = EntityCategory::from_xml_name(&name).ok_or_else(|| {
                        ModelError::Parse(format!("unexpected element <{name}> in <rules>"))
                    })?;
                    let id = registry.intern(&xml::require_attr(e, "id")?);
                    let display_name = xml::attr(e, "name")?.unwrap_or_default();
                    let mut class = EntityClass::new(id, category, &display_name);
                    if xml::attr(e, "background")?.as_deref() == Some("true") {
                        if category != EntityCategory::Terrain {
                            return Err(ModelError::Parse(format!(
                                "background attribute on non-terrain <{name}>"
                            )));
                        }
                        class.background = true;
                    }
                    if matches!(event, Event::Start(_)) {
                        class.read_body(reader, name.as_bytes(), registry)?;
                    }
                    if self.classes.contains_key(class.id.as_str()) {
                        return Err(ModelError::DuplicateIdentifier(class.id.to_string()));
                    }
                    self.classes.insert(class.id.clone(), class);
                }
                Event::End(e) if e.name().as_ref() == b"rules" => break,
                Event::Text(_) | Event::Comment(_) => {}
                Event::Eof => return Err(ModelError::Parse("unexpected end of <rules>".into())),
                other => {
                    return Err(ModelError::Parse(format!(
                        "unexpected content in <rules>: {other:?}"
                    )))
                }
            }
        }
        Ok(())
    }

    pub(crate) fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), ModelError> {
        writer
            .write_event(Event::Start(BytesStart::new("rules")))
            .map_err(xml_err)?;
        for class in self.classes.values() {
            class.write_xml(writer)?;
        }
        writer
            .write_event(Event::End(BytesEnd::new("rules")))
            .map_err(xml_err)?;
        Ok(())
    }
}

impl ContentEntity for EntitySection {
    type Scope<'a> = &'a VariableSection;

    fn process_identifier(&mut self, old: &Identifier, new: Option<&Identifier>) -> usize {
        let mut count = 0;
        for class in self.classes.values_mut() {
            count += class.process_identifier(old, new);
        }
        count
            + process_map_keys(&mut self.classes, old, new, |class, renamed| {
                class.id = renamed.clone();
            })
    }

    fn validate(
        &mut self,
        variables: &VariableSection,
        authority: Authority,
    ) -> Result<(), ModelError> {
        for class in self.classes.values_mut() {
            class.validate(variables, authority)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modifier::ModifierTarget;
    use crate::variables::{VariableCategory, VariableClass};

    fn variables() -> VariableSection {
        let edit = EditContext::new();
        let mut vars = VariableSection::new();
        vars.insert(
            VariableClass::new(
                Identifier::new("strength"),
                VariableCategory::Attribute,
                "Strength",
            ),
            &edit,
        )
        .unwrap();
        vars
    }

    fn spearman() -> EntityClass {
        let edit = EditContext::new();
        let mut class = EntityClass::new(
            Identifier::new("spearman"),
            EntityCategory::Unit,
            "Spearman",
        );
        let mut m = VariableModifier::new();
        m.set_by_target(ModifierTarget::Itself, Some(2), &edit).unwrap();
        class.set_modifier(Identifier::new("strength"), m, &edit);
        class
    }

    #[test]
    fn test_category_immutable_and_background_guard() {
        let edit = EditContext::new();
        let mut unit = spearman();
        assert_eq!(unit.category(), EntityCategory::Unit);
        assert!(unit.set_background(true, &edit).is_err());

        let mut grass = EntityClass::new(
            Identifier::new("grass"),
            EntityCategory::Terrain,
            "Grass",
        );
        grass.set_background(true, &edit).unwrap();
        assert!(grass.is_background());
    }

    #[test]
    fn test_variable_rename_cascades_into_modifier_keys() {
        let mut class = spearman();
        let old = Identifier::new("strength");
        let new = Identifier::new("power");
        assert_eq!(class.process_identifier(&old, Some(&new)), 1);
        assert!(class.get_modifier("strength").is_none());
        assert!(class.get_modifier("power").is_some());
    }

    #[test]
    fn test_template_effective_modifier_prefers_override() {
        let edit = EditContext::new();
        let class = spearman();
        let mut template = EntityTemplate::new(Identifier::new("spearman"));
        assert_eq!(
            template
                .effective_modifier("strength", &class)
                .unwrap()
                .get_by_target(ModifierTarget::Itself),
            Some(2)
        );

        let mut stronger = VariableModifier::new();
        stronger
            .set_by_target(ModifierTarget::Itself, Some(5), &edit)
            .unwrap();
        template.set_override(Identifier::new("strength"), stronger, &edit);
        assert_eq!(
            template
                .effective_modifier("strength", &class)
                .unwrap()
                .get_by_target(ModifierTarget::Itself),
            Some(5)
        );
    }

    #[test]
    fn test_template_validation_resolves_class_or_fails() {
        let edit = EditContext::new();
        let vars = variables();
        let mut section = EntitySection::new();
        section.insert(spearman(), &edit).unwrap();

        let scope = TemplateScope {
            entities: &section,
            variables: &vars,
            expected: EntityCategory::Unit,
        };

        let mut template = EntityTemplate::new(Identifier::new("spearman"));
        template.validate(scope, Authority::Runtime).unwrap();
        assert_eq!(template.class().resolution(), Resolution::Index(0));

        let mut dangling = EntityTemplate::new(Identifier::new("pikeman"));
        let err = dangling.validate(scope, Authority::Runtime).unwrap_err();
        assert!(matches!(err, ModelError::UnresolvedReference { .. }));

        // Editor authority keeps the id and records the miss.
        let mut tolerated = EntityTemplate::new(Identifier::new("pikeman"));
        tolerated.validate(scope, Authority::Editor).unwrap();
        assert_eq!(tolerated.class().id().unwrap().as_str(), "pikeman");
        assert!(!tolerated.class().is_resolved());
    }

    #[test]
    fn test_template_category_mismatch_is_schema_error() {
        let edit = EditContext::new();
        let vars = variables();
        let mut section = EntitySection::new();
        section.insert(spearman(), &edit).unwrap();

        let scope = TemplateScope {
            entities: &section,
            variables: &vars,
            expected: EntityCategory::Terrain,
        };
        let mut template = EntityTemplate::new(Identifier::new("spearman"));
        let err = template.validate(scope, Authority::Runtime).unwrap_err();
        assert!(matches!(err, ModelError::Schema(_)));

        // Editor authority tolerates the misplacement so the user can
        // move or retype the template; the class still resolves.
        template.validate(scope, Authority::Editor).unwrap();
        assert_eq!(template.class().resolution(), Resolution::Index(0));
        assert_eq!(template.class().id().unwrap().as_str(), "spearman");
    }

    #[test]
    fn test_prune_empty_modifiers() {
        let edit = EditContext::new();
        let mut class = spearman();
        class.set_modifier(
            Identifier::new("noop"),
            VariableModifier::new(),
            &edit,
        );
        assert_eq!(class.prune_empty_modifiers(&edit), 1);
        assert!(class.get_modifier("strength").is_some());
        assert!(class.get_modifier("noop").is_none());
    }

    #[test]
    fn test_section_xml_round_trip() {
        let edit = EditContext::new();
        let mut section = EntitySection::new();
        section.insert(spearman(), &edit).unwrap();
        let mut grass = EntityClass::new(
            Identifier::new("grass"),
            EntityCategory::Terrain,
            "Grass",
        );
        grass.set_background(true, &edit).unwrap();
        section.insert(grass, &edit).unwrap();

        let mut writer = Writer::new(Vec::new());
        section.write_xml(&mut writer).unwrap();
        let xml = String::from_utf8(writer.into_inner()).unwrap();

        let mut parsed = EntitySection::new();
        let mut registry = IdentifierRegistry::new();
        let mut reader = Reader::from_str(&xml);
        reader.config_mut().trim_text(true);
        match reader.read_event().unwrap() {
            Event::Start(e) => assert_eq!(e.name().as_ref(), b"rules"),
            other => panic!("expected rules start, got {other:?}"),
        }
        parsed.read_xml(&mut reader, &mut registry).unwrap();

        assert_eq!(parsed.len(), 2);
        assert!(parsed.is_background_terrain("grass"));
        let spearman = parsed.get("spearman").unwrap();
        assert_eq!(
            spearman
                .get_modifier("strength")
                .unwrap()
                .get_by_target(ModifierTarget::Itself),
            Some(2)
        );
    }
}
