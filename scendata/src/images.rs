//! Image stacks: layered references into the external image store.
//!
//! The store itself (bitmap loading, caching) is a collaborator outside
//! this crate; the model only keeps ordered identifier references and
//! resolves them through the [`ImageLookup`] contract.

use std::collections::HashSet;
use std::io::Write;

use indexmap::IndexMap;
use quick_xml::events::{BytesEnd, BytesStart, Event};
use quick_xml::{Reader, Writer};

use crate::error::ModelError;
use crate::identifier::{
    process_map_keys, Authority, ContentEntity, EditContext, IdRef, Identifier,
    IdentifierRegistry, Resolution,
};
use crate::xml::{self, xml_err};

/// Collaborator contract: does the external image dictionary hold an
/// image under this id?
pub trait ImageLookup {
    fn contains_image(&self, id: &str) -> bool;
}

impl ImageLookup for HashSet<String> {
    fn contains_image(&self, id: &str) -> bool {
        self.contains(id)
    }
}

/// Lookup that reports every image as present. Used by tooling that
/// manipulates scenario files without an image store at hand.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllImages;

impl ImageLookup for AllImages {
    fn contains_image(&self, _id: &str) -> bool {
        true
    }
}

/// An ordered stack of image layers, bottom first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageStack {
    layers: Vec<IdRef>,
}

impl ImageStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn layers(&self) -> &[IdRef] {
        &self.layers
    }

    pub fn push_layer(&mut self, image: Identifier, _edit: &EditContext) {
        self.layers.push(IdRef::new(image));
    }

    pub(crate) fn read_xml(
        reader: &mut Reader<&[u8]>,
        start: &BytesStart,
        empty: bool,
        registry: &mut IdentifierRegistry,
    ) -> Result<(Identifier, Self), ModelError> {
        let id = registry.intern(&xml::require_attr(start, "id")?);
        let mut stack = ImageStack::new();
        if empty {
            return Ok((id, stack));
        }
        loop {
            let event = reader.read_event().map_err(xml_err)?;
            match event {
                Event::Empty(ref e) | Event::Start(ref e) if e.name().as_ref() == b"image" => {
                    let image = registry.intern(&xml::require_attr(e, "ref")?);
                    stack.layers.push(IdRef::new(image));
                    if matches!(event, Event::Start(_)) {
                        xml::skip_element(reader, e)?;
                    }
                }
                Event::End(e) if e.name() == start.name() => break,
                Event::Text(_) | Event::Comment(_) => {}
                Event::Eof => {
                    return Err(ModelError::Parse("unexpected end of <imageStack>".into()))
                }
                other => {
                    return Err(ModelError::Parse(format!(
                        "unexpected content in <imageStack>: {other:?}"
                    )))
                }
            }
        }
        Ok((id, stack))
    }

    pub(crate) fn write_xml<W: Write>(
        &self,
        writer: &mut Writer<W>,
        id: &Identifier,
    ) -> Result<(), ModelError> {
        let mut el = BytesStart::new("imageStack");
        el.push_attribute(("id", id.as_str()));
        if self.layers.is_empty() {
            writer.write_event(Event::Empty(el)).map_err(xml_err)?;
            return Ok(());
        }
        writer.write_event(Event::Start(el)).map_err(xml_err)?;
        for layer in &self.layers {
            if let Some(image) = layer.id() {
                let mut layer_el = BytesStart::new("image");
                layer_el.push_attribute(("ref", image.as_str()));
                writer.write_event(Event::Empty(layer_el)).map_err(xml_err)?;
            }
        }
        writer
            .write_event(Event::End(BytesEnd::new("imageStack")))
            .map_err(xml_err)?;
        Ok(())
    }
}

impl ContentEntity for ImageStack {
    type Scope<'a> = &'a dyn ImageLookup;

    fn process_identifier(&mut self, old: &Identifier, new: Option<&Identifier>) -> usize {
        let mut count = 0;
        for layer in self.layers.iter_mut() {
            count += layer.process_identifier(old, new);
        }
        // Blanked layers render nothing; drop them.
        if new.is_none() {
            self.layers.retain(|layer| layer.is_set());
        }
        count
    }

    fn validate(
        &mut self,
        images: &dyn ImageLookup,
        authority: Authority,
    ) -> Result<(), ModelError> {
        for layer in self.layers.iter_mut() {
            let Some(image) = layer.id().cloned() else {
                continue;
            };
            if images.contains_image(&image) {
                layer.resolve(Resolution::External);
            } else {
                layer.resolve(Resolution::Unresolved);
                if authority == Authority::Runtime {
                    return Err(ModelError::UnresolvedReference {
                        id: image.to_string(),
                        context: "image stack layer".into(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// The images section: stacks keyed by identifier, serialized as
/// repeated top-level `<imageStack id=..>` elements.
#[derive(Debug, Default)]
pub struct ImageSection {
    stacks: IndexMap<Identifier, ImageStack>,
}

impl ImageSection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&ImageStack> {
        self.stacks.get(id)
    }

    pub fn stacks(&self) -> impl Iterator<Item = (&Identifier, &ImageStack)> {
        self.stacks.iter()
    }

    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    pub fn insert(
        &mut self,
        id: Identifier,
        stack: ImageStack,
        _edit: &EditContext,
    ) -> Result<(), ModelError> {
        if self.stacks.contains_key(id.as_str()) {
            return Err(ModelError::DuplicateIdentifier(id.to_string()));
        }
        self.stacks.insert(id, stack);
        Ok(())
    }

    pub(crate) fn insert_parsed(
        &mut self,
        id: Identifier,
        stack: ImageStack,
    ) -> Result<(), ModelError> {
        if self.stacks.contains_key(id.as_str()) {
            return Err(ModelError::DuplicateIdentifier(id.to_string()));
        }
        self.stacks.insert(id, stack);
        Ok(())
    }

    pub(crate) fn write_xml<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), ModelError> {
        for (id, stack) in &self.stacks {
            stack.write_xml(writer, id)?;
        }
        Ok(())
    }
}

impl ContentEntity for ImageSection {
    type Scope<'a> = &'a dyn ImageLookup;

    fn process_identifier(&mut self, old: &Identifier, new: Option<&Identifier>) -> usize {
        let mut count = 0;
        for stack in self.stacks.values_mut() {
            count += stack.process_identifier(old, new);
        }
        count + process_map_keys(&mut self.stacks, old, new, |_, _| {})
    }

    fn validate(
        &mut self,
        images: &dyn ImageLookup,
        authority: Authority,
    ) -> Result<(), ModelError> {
        for stack in self.stacks.values_mut() {
            stack.validate(images, authority)?;
        }
        Ok(())
    }
}
