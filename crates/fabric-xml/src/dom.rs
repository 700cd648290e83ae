// Numan Thabit 2025
//! Minimal element tree over the event stream. The machine schema is
//! attribute-only and the files are small, so one in-memory tree keeps
//! every reader on a single code path.

use std::collections::BTreeMap;

use quick_xml::events::Event;
use quick_xml::Reader;

use crate::{Result, XmlError};

#[derive(Debug, Default)]
pub struct Elem {
    pub name: String,
    pub attrs: BTreeMap<String, String>,
    pub children: Vec<Elem>,
}

impl Elem {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    pub fn require(&self, name: &'static str) -> Result<&str> {
        self.attr(name).ok_or_else(|| XmlError::MissingAttribute {
            element: self.name.clone(),
            attribute: name,
        })
    }

    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a Elem> {
        self.children.iter().filter(move |c| c.name == name)
    }

    pub fn child(&self, name: &str) -> Option<&Elem> {
        self.children.iter().find(|c| c.name == name)
    }
}

fn start_elem(e: &quick_xml::events::BytesStart<'_>) -> Result<Elem> {
    let mut elem = Elem {
        name: String::from_utf8_lossy(e.name().as_ref()).into_owned(),
        ..Elem::default()
    };
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        elem.attrs.insert(
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            attr.unescape_value()?.into_owned(),
        );
    }
    Ok(elem)
}

/// Parse a document into its root element.
pub fn parse(text: &str) -> Result<Elem> {
    let mut reader = Reader::from_str(text);
    reader.trim_text(true);

    let mut stack: Vec<Elem> = Vec::new();
    loop {
        match reader.read_event()? {
            Event::Start(e) => stack.push(start_elem(&e)?),
            Event::Empty(e) => {
                let elem = start_elem(&e)?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(elem),
                    None => return Ok(elem),
                }
            }
            Event::End(_) => {
                let elem = stack.pop().ok_or_else(|| {
                    XmlError::Invalid("unbalanced end tag".to_string())
                })?;
                match stack.last_mut() {
                    Some(parent) => parent.children.push(elem),
                    None => return Ok(elem),
                }
            }
            Event::Eof => {
                return Err(XmlError::Invalid("no root element".to_string()));
            }
            // The schema carries no text payloads.
            _ => {}
        }
    }
}
