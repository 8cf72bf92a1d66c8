use chrono::{NaiveDate, NaiveDateTime};

use crate::metadata::{self, Metadata, RightLeft};

/// Prefix of an XMP APP1 segment.
pub(crate) const XMP_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

/// Namespace holding the fields that have no standard XMP/EXIF home.
pub const IRIS_NAMESPACE: &str = "http://ns.iris-meta.org/xmp/1.0/";
const IRIS_PREFIX: &str = "iris";
const DC_NAMESPACE: &str = "http://purl.org/dc/elements/1.1/";

const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Local names of all elements in the application namespace.
const IRIS_FIELDS: &[&str] = &[
    "comment",
    "person",
    "xCenter",
    "yCenter",
    "overlayScaleFactor",
    "xPosition",
    "yPosition",
    "zoomFactor",
    "organizeDate",
    "rightLeft",
    "brightness",
    "contrast",
    "overlayColor",
    "pupilSize",
    "pupilXOffset",
    "pupilYOffset",
    "flags",
];

const DC_FIELDS: &[&str] = &["dc:title", "dc:description", "dc:subject"];

/// Serialize the application namespace values of `m`, in `IRIS_FIELDS` order.
fn iris_values(m: &Metadata) -> Vec<(&'static str, Option<String>)> {
    let num = |v: Option<f32>| v.map(|v| v.to_string());
    vec![
        ("comment", m.comment.clone()),
        ("person", m.person.clone()),
        ("xCenter", num(m.x_center)),
        ("yCenter", num(m.y_center)),
        ("overlayScaleFactor", num(m.overlay_scale_factor)),
        ("xPosition", num(m.x_position)),
        ("yPosition", num(m.y_position)),
        ("zoomFactor", num(m.zoom_factor)),
        (
            "organizeDate",
            m.organize_date.map(|d| d.format(DATE_FORMAT).to_string()),
        ),
        ("rightLeft", m.right_left.map(|rl| rl.as_str().to_string())),
        ("brightness", num(m.brightness)),
        ("contrast", num(m.contrast)),
        ("overlayColor", m.overlay_color.map(metadata::format_color)),
        ("pupilSize", num(m.pupil_size)),
        ("pupilXOffset", num(m.pupil_x_offset)),
        ("pupilYOffset", num(m.pupil_y_offset)),
        ("flags", (m.flags != 0).then(|| m.flags.to_string())),
    ]
}

/// Render the elements for all set fields, one per line.
fn render_elements(m: &Metadata) -> String {
    let mut out = String::new();

    if let Some(ref t) = m.title {
        let t_esc = xml_escape(t);
        out.push_str(&format!(
            "  <dc:title><rdf:Alt><rdf:li xml:lang=\"x-default\">{t_esc}</rdf:li></rdf:Alt></dc:title>\n"
        ));
    }
    if let Some(ref d) = m.description {
        let d_esc = xml_escape(d);
        out.push_str(&format!(
            "  <dc:description><rdf:Alt><rdf:li xml:lang=\"x-default\">{d_esc}</rdf:li></rdf:Alt></dc:description>\n"
        ));
    }
    if let Some(ref s) = m.subject {
        let s_esc = xml_escape(s);
        out.push_str(&format!(
            "  <dc:subject><rdf:Bag><rdf:li>{s_esc}</rdf:li></rdf:Bag></dc:subject>\n"
        ));
    }

    for (name, value) in iris_values(m) {
        if let Some(value) = value {
            out.push_str(&format!(
                "  <{IRIS_PREFIX}:{name}>{}</{IRIS_PREFIX}:{name}>\n",
                xml_escape(&value)
            ));
        }
    }

    out
}

/// Build the XMP packet for `m`.
///
/// With an existing packet, the fields owned by this crate are replaced in
/// place and everything else (other namespaces, other Description blocks)
/// is kept. Fields absent in `m` are removed from the packet.
pub(crate) fn build_xmp(existing: Option<&str>, m: &Metadata) -> String {
    if let Some(xmp) = existing {
        if let Some(updated) = inject_into_existing_xmp(xmp, m) {
            return updated;
        }
        log::debug!("Existing XMP has no rdf:Description, replacing packet");
    }

    let mut xmp = String::new();
    xmp.push_str("<?xpacket begin=\"\u{feff}\" id=\"W5M0MpCehiHzreSzNTczkc9d\"?>\n");
    xmp.push_str("<x:xmpmeta xmlns:x=\"adobe:ns:meta/\">\n");
    xmp.push_str("<rdf:RDF xmlns:rdf=\"http://www.w3.org/1999/02/22-rdf-syntax-ns#\">\n");
    xmp.push_str("<rdf:Description rdf:about=\"\"\n");
    xmp.push_str(&format!("  xmlns:dc=\"{DC_NAMESPACE}\"\n"));
    xmp.push_str(&format!("  xmlns:{IRIS_PREFIX}=\"{IRIS_NAMESPACE}\">\n"));
    xmp.push_str(&render_elements(m));
    xmp.push_str("</rdf:Description>\n");
    xmp.push_str("</rdf:RDF>\n");
    xmp.push_str("</x:xmpmeta>\n");
    xmp.push_str("<?xpacket end=\"w\"?>");
    xmp
}

/// Replace this crate's fields inside an existing packet.
/// Returns `None` if the packet has no `rdf:Description` to write into.
fn inject_into_existing_xmp(xmp: &str, m: &Metadata) -> Option<String> {
    let mut result = xmp.to_string();

    let desc_start = result.find("<rdf:Description")?;

    // Self-closing rdf:Description: convert to open/close
    let (_, desc_open_end) = find_open_tag(&result, "rdf:Description", desc_start)?;
    if result[..desc_open_end].ends_with("/>") {
        result.replace_range(desc_open_end - 2..desc_open_end, ">");
        let close_at = desc_open_end - 1;
        result.insert_str(close_at, "\n</rdf:Description>");
    }

    // Ensure namespaces are declared
    let decl_at = desc_start + "<rdf:Description".len();
    if !result.contains(&format!("xmlns:{IRIS_PREFIX}=")) {
        result.insert_str(decl_at, &format!("\n  xmlns:{IRIS_PREFIX}=\"{IRIS_NAMESPACE}\""));
    }
    if !result.contains("xmlns:dc=") {
        result.insert_str(decl_at, &format!("\n  xmlns:dc=\"{DC_NAMESPACE}\""));
    }

    for tag in DC_FIELDS {
        remove_xml_element(&mut result, tag);
    }
    for name in IRIS_FIELDS {
        let qualified = format!("{IRIS_PREFIX}:{name}");
        remove_xml_element(&mut result, &qualified);
        remove_xml_attribute(&mut result, &qualified);
    }

    // Re-find position after removals
    let pos = result.find("</rdf:Description>")?;
    result.insert_str(pos, &render_elements(m));
    Some(result)
}

/// Read this crate's fields from an XMP packet.
///
/// Values may be stored as elements or as attributes of `rdf:Description`.
/// Unparseable values are treated as absent.
pub(crate) fn parse_xmp(xmp: &str) -> Metadata {
    let mut m = Metadata {
        title: field_text(xmp, "dc:title"),
        description: field_text(xmp, "dc:description"),
        subject: field_text(xmp, "dc:subject"),
        ..Default::default()
    };

    let iris = |name: &str| field_text(xmp, &format!("{IRIS_PREFIX}:{name}"));
    let num = |name: &str| iris(name).and_then(|v| v.parse::<f32>().ok());

    m.comment = iris("comment");
    m.person = iris("person");
    m.x_center = num("xCenter");
    m.y_center = num("yCenter");
    m.overlay_scale_factor = num("overlayScaleFactor");
    m.x_position = num("xPosition");
    m.y_position = num("yPosition");
    m.zoom_factor = num("zoomFactor");
    m.organize_date = iris("organizeDate").and_then(|v| parse_date(&v));
    m.right_left = iris("rightLeft").and_then(|v| RightLeft::parse(&v));
    m.brightness = num("brightness");
    m.contrast = num("contrast");
    m.overlay_color = iris("overlayColor").and_then(|v| metadata::parse_color(&v));
    m.pupil_size = num("pupilSize");
    m.pupil_x_offset = num("pupilXOffset");
    m.pupil_y_offset = num("pupilYOffset");
    m.flags = iris("flags")
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);
    m
}

fn parse_date(value: &str) -> Option<NaiveDateTime> {
    value.parse::<NaiveDateTime>().ok().or_else(|| {
        value
            .parse::<NaiveDate>()
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    })
}

/// Text of a field in element form (unwrapping an rdf container) or attribute form.
fn field_text(xmp: &str, tag: &str) -> Option<String> {
    let raw = match element_content(xmp, tag) {
        Some(content) => match find_open_tag(content, "rdf:li", 0) {
            Some((_, li_start)) => {
                let end = content[li_start..].find("</rdf:li>")?;
                content[li_start..li_start + end].to_string()
            }
            None => content.to_string(),
        },
        None => attribute_value(xmp, tag)?,
    };
    let value = xml_unescape(raw.trim());
    if value.is_empty() { None } else { Some(value) }
}

/// Locate `<tag` followed by a tag boundary, starting at `from`.
/// Returns the index of `<` and the index just past the closing `>`.
fn find_open_tag(xml: &str, tag: &str, from: usize) -> Option<(usize, usize)> {
    let open = format!("<{tag}");
    let mut pos = from;
    while let Some(rel) = xml.get(pos..)?.find(&open) {
        let start = pos + rel;
        let after = start + open.len();
        let boundary = xml[after..]
            .chars()
            .next()
            .is_some_and(|c| c == '>' || c == '/' || c.is_whitespace());
        if boundary {
            let end = after + xml[after..].find('>')? + 1;
            return Some((start, end));
        }
        pos = after;
    }
    None
}

fn element_content<'a>(xml: &'a str, tag: &str) -> Option<&'a str> {
    let (_, open_end) = find_open_tag(xml, tag, 0)?;
    if xml[..open_end].ends_with("/>") {
        return Some("");
    }
    let close = format!("</{tag}>");
    let len = xml[open_end..].find(&close)?;
    Some(&xml[open_end..open_end + len])
}

fn attribute_value(xml: &str, name: &str) -> Option<String> {
    let (value_start, quote) = find_attribute(xml, name)?;
    let len = xml[value_start..].find(quote)?;
    Some(xml[value_start..value_start + len].to_string())
}

/// Position just past the opening quote of `name="`/`name='`, and the quote.
fn find_attribute(xml: &str, name: &str) -> Option<(usize, char)> {
    let needle = format!("{name}=");
    let mut pos = 0;
    while let Some(rel) = xml[pos..].find(&needle) {
        let start = pos + rel;
        let after = start + needle.len();
        let preceded = xml[..start].chars().next_back().is_some_and(char::is_whitespace);
        let quote = xml[after..].chars().next().filter(|c| *c == '"' || *c == '\'');
        if let (true, Some(quote)) = (preceded, quote) {
            return Some((after + 1, quote));
        }
        pos = after;
    }
    None
}

/// Remove every occurrence of an XML element and its contents.
fn remove_xml_element(xml: &mut String, tag: &str) {
    let close = format!("</{tag}>");
    while let Some((start, open_end)) = find_open_tag(xml, tag, 0) {
        let end = if xml[..open_end].ends_with("/>") {
            open_end
        } else {
            match xml[open_end..].find(&close) {
                Some(len) => open_end + len + close.len(),
                None => return,
            }
        };
        // Also remove trailing newline if present
        let end = if xml.as_bytes().get(end) == Some(&b'\n') { end + 1 } else { end };
        // And the indentation in front of the element
        let start = xml[..start].trim_end_matches([' ', '\t']).len();
        xml.replace_range(start..end, "");
    }
}

/// Remove every occurrence of an attribute, with its leading whitespace.
fn remove_xml_attribute(xml: &mut String, name: &str) {
    while let Some((value_start, quote)) = find_attribute(xml, name) {
        let Some(len) = xml[value_start..].find(quote) else {
            return;
        };
        let name_start = value_start - 1 - name.len() - 1;
        let start = xml[..name_start].trim_end().len();
        xml.replace_range(start..value_start + len + 1, "");
    }
}

/// Escape special XML characters.
fn xml_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::FLAG_OVERLAY_SET_BY_CAMERA;

    fn sample() -> Metadata {
        Metadata {
            title: Some("Right eye".into()),
            description: Some("Control <after> treatment".into()),
            subject: Some("iris".into()),
            comment: Some("Lacuna at 7 o'clock & ring".into()),
            person: Some("Jane Doe".into()),
            x_center: Some(0.51),
            y_center: Some(0.47),
            overlay_scale_factor: Some(1.25),
            x_position: Some(0.5),
            y_position: Some(0.5),
            zoom_factor: Some(2.0),
            organize_date: NaiveDate::from_ymd_opt(2024, 3, 17)
                .and_then(|d| d.and_hms_opt(9, 30, 0)),
            right_left: Some(RightLeft::Right),
            brightness: Some(-0.2),
            contrast: Some(1.4),
            overlay_color: Some(0xFFFF_0000),
            pupil_size: Some(0.3),
            pupil_x_offset: Some(-0.01),
            pupil_y_offset: Some(0.02),
            flags: FLAG_OVERLAY_SET_BY_CAMERA,
            orientation: None,
        }
    }

    // ── fresh packets ────────────────────────────────────────────────

    #[test]
    fn fresh_packet_round_trips_all_fields() {
        let m = sample();
        let xmp = build_xmp(None, &m);
        assert!(xmp.contains(IRIS_NAMESPACE));
        assert_eq!(parse_xmp(&xmp), m);
    }

    #[test]
    fn fresh_packet_escapes_text() {
        let xmp = build_xmp(None, &sample());
        assert!(xmp.contains("Control &lt;after&gt; treatment"));
        assert!(xmp.contains("7 o&apos;clock &amp; ring"));
    }

    #[test]
    fn absent_fields_are_not_written() {
        let m = Metadata {
            comment: Some("only this".into()),
            ..Default::default()
        };
        let xmp = build_xmp(None, &m);
        assert!(xmp.contains("<iris:comment>only this</iris:comment>"));
        assert!(!xmp.contains("iris:brightness"));
        assert!(!xmp.contains("iris:flags"));
        assert!(!xmp.contains("dc:title"));
    }

    #[test]
    fn empty_metadata_parses_from_empty_packet() {
        let xmp = build_xmp(None, &Metadata::default());
        assert!(parse_xmp(&xmp).is_empty());
    }

    // ── existing packets ─────────────────────────────────────────────

    const FOREIGN: &str = r#"<?xpacket begin="" id="W5M0MpCehiHzreSzNTczkc9d"?>
<x:xmpmeta xmlns:x="adobe:ns:meta/">
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#">
<rdf:Description rdf:about=""
  xmlns:xmp="http://ns.adobe.com/xap/1.0/"
  xmlns:dc="http://purl.org/dc/elements/1.1/">
  <xmp:CreatorTool>Fundus Camera 3000</xmp:CreatorTool>
  <dc:title><rdf:Alt><rdf:li xml:lang="x-default">Old title</rdf:li></rdf:Alt></dc:title>
</rdf:Description>
</rdf:RDF>
</x:xmpmeta>
<?xpacket end="w"?>"#;

    #[test]
    fn inject_preserves_foreign_elements() {
        let xmp = build_xmp(Some(FOREIGN), &sample());
        assert!(xmp.contains("<xmp:CreatorTool>Fundus Camera 3000</xmp:CreatorTool>"));
        assert!(xmp.contains(&format!("xmlns:iris=\"{IRIS_NAMESPACE}\"")));
        assert!(!xmp.contains("Old title"));
        assert_eq!(xmp.matches("<dc:title>").count(), 1);
        assert_eq!(parse_xmp(&xmp), sample());
    }

    #[test]
    fn inject_removes_cleared_fields() {
        let first = build_xmp(Some(FOREIGN), &sample());
        let cleared = Metadata {
            comment: Some("kept".into()),
            ..Default::default()
        };
        let second = build_xmp(Some(&first), &cleared);
        assert!(!second.contains("iris:brightness"));
        assert!(!second.contains("dc:title"));
        assert!(second.contains("Fundus Camera 3000"));
        assert_eq!(parse_xmp(&second), cleared);
    }

    #[test]
    fn repeated_injection_is_stable() {
        let once = build_xmp(Some(FOREIGN), &sample());
        let twice = build_xmp(Some(&once), &sample());
        assert_eq!(once, twice);
    }

    #[test]
    fn inject_into_self_closing_description() {
        let existing = r#"<x:xmpmeta xmlns:x="adobe:ns:meta/"><rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#"><rdf:Description rdf:about="" xmlns:tiff="http://ns.adobe.com/tiff/1.0/" tiff:Make="Acme"/></rdf:RDF></x:xmpmeta>"#;
        let m = Metadata {
            brightness: Some(0.25),
            ..Default::default()
        };
        let xmp = build_xmp(Some(existing), &m);
        assert!(xmp.contains("tiff:Make=\"Acme\""));
        assert!(xmp.contains("</rdf:Description>"));
        assert_eq!(parse_xmp(&xmp).brightness, Some(0.25));
    }

    #[test]
    fn packet_without_description_is_replaced() {
        let xmp = build_xmp(Some("<x:xmpmeta/>"), &sample());
        assert_eq!(parse_xmp(&xmp), sample());
    }

    // ── parsing ──────────────────────────────────────────────────────

    #[test]
    fn attribute_form_is_read_and_replaced() {
        let existing = r#"<rdf:RDF><rdf:Description rdf:about="" xmlns:iris="http://ns.iris-meta.org/xmp/1.0/" iris:xCenter="0.25" iris:rightLeft='l'></rdf:Description></rdf:RDF>"#;
        let parsed = parse_xmp(existing);
        assert_eq!(parsed.x_center, Some(0.25));
        assert_eq!(parsed.right_left, Some(RightLeft::Left));

        let m = Metadata {
            x_center: Some(0.75),
            ..Default::default()
        };
        let xmp = build_xmp(Some(existing), &m);
        assert!(!xmp.contains("iris:xCenter=\"0.25\""));
        assert!(!xmp.contains("iris:rightLeft="));
        assert_eq!(parse_xmp(&xmp).x_center, Some(0.75));
    }

    #[test]
    fn garbage_values_are_absent() {
        let xmp = "<iris:brightness>bright</iris:brightness><iris:overlayColor>blue</iris:overlayColor>";
        let m = parse_xmp(xmp);
        assert_eq!(m.brightness, None);
        assert_eq!(m.overlay_color, None);
    }

    #[test]
    fn prefix_of_longer_tag_does_not_match() {
        let xmp = "<iris:commentary>no</iris:commentary><iris:comment>yes</iris:comment>";
        assert_eq!(parse_xmp(xmp).comment.as_deref(), Some("yes"));
    }

    #[test]
    fn date_only_value_is_midnight() {
        let xmp = "<iris:organizeDate>2023-11-05</iris:organizeDate>";
        let expected = NaiveDate::from_ymd_opt(2023, 11, 5).and_then(|d| d.and_hms_opt(0, 0, 0));
        assert_eq!(parse_xmp(xmp).organize_date, expected);
    }
}
