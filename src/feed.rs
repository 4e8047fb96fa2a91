use quick_xml::events::Event;
use quick_xml::Reader;
use serde_json::{Map, Value};

/// Parse an RSS or Atom feed into one JSON object per `<item>`/`<entry>`.
///
/// Child elements become keys by local name. Repeated `<category>` elements
/// collect into an array; Atom `<link href=".."/>` and `<category term=".."/>`
/// are read from attributes.
pub fn parse_items(xml: &str) -> Result<Vec<Value>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut items = Vec::new();
    let mut item: Option<Map<String, Value>> = None;
    let mut current: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = local_name(e.local_name().as_ref());
                if is_item(&name) {
                    item = Some(Map::new());
                } else if let Some(fields) = item.as_mut() {
                    if name == "link" {
                        read_href(&e, fields);
                    }
                    current = Some(name);
                }
            }
            Event::Empty(e) => {
                if let Some(fields) = item.as_mut() {
                    match local_name(e.local_name().as_ref()).as_str() {
                        "link" => read_href(&e, fields),
                        "category" => {
                            for attr in e.attributes().flatten() {
                                if attr.key.as_ref() == b"term" {
                                    let term = attr.unescape_value()?.to_string();
                                    push_text(fields, "category", &term);
                                }
                            }
                        }
                        _ => {}
                    }
                }
            }
            Event::Text(e) => {
                if let (Some(fields), Some(key)) = (item.as_mut(), current.as_deref()) {
                    push_text(fields, key, &e.unescape()?);
                }
            }
            Event::CData(e) => {
                if let (Some(fields), Some(key)) = (item.as_mut(), current.as_deref()) {
                    push_text(fields, key, &String::from_utf8_lossy(&e.into_inner()));
                }
            }
            Event::End(e) => {
                let name = local_name(e.local_name().as_ref());
                if is_item(&name) {
                    if let Some(fields) = item.take() {
                        items.push(Value::Object(fields));
                    }
                    current = None;
                } else if current.as_deref() == Some(name.as_str()) {
                    current = None;
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }
    Ok(items)
}

fn local_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

fn is_item(name: &str) -> bool {
    name == "item" || name == "entry"
}

fn read_href(e: &quick_xml::events::BytesStart<'_>, fields: &mut Map<String, Value>) {
    for attr in e.attributes().flatten() {
        if attr.key.as_ref() == b"href" {
            if let Ok(href) = attr.unescape_value() {
                fields
                    .entry("link")
                    .or_insert_with(|| Value::String(href.to_string()));
            }
        }
    }
}

fn push_text(fields: &mut Map<String, Value>, key: &str, text: &str) {
    let text = text.trim();
    if text.is_empty() {
        return;
    }
    match fields.get_mut(key) {
        None => {
            fields.insert(key.to_string(), Value::String(text.to_string()));
        }
        Some(Value::String(existing)) if key == "category" => {
            let first = std::mem::take(existing);
            fields.insert(
                key.to_string(),
                Value::Array(vec![Value::String(first), Value::String(text.to_string())]),
            );
        }
        Some(Value::Array(list)) => list.push(Value::String(text.to_string())),
        Some(Value::String(existing)) => {
            existing.push(' ');
            existing.push_str(text);
        }
        Some(_) => {}
    }
}
