use super::*;

const MIXED_XML: &str = "<?xml version=\"1.0\"?>\r\n<doc xmlns=\"urn:x\" xmlns:b=\"urn:b\" z=\"3\" b:a=\"2\" a=\"1\">\r\n  <e   attr='v&amp;\"x' tab=\"a&#9;b\">t&lt;&gt;&#xD;<![CDATA[<raw>]]></e><empty/><!-- c --><inner xmlns:b=\"urn:b\" xmlns=\"urn:y\"/></doc>";

// xmllint --c14n, minus the comment
const MIXED_C14N: &str = "<doc xmlns=\"urn:x\" xmlns:b=\"urn:b\" a=\"1\" z=\"3\" b:a=\"2\">\n  <e attr=\"v&amp;&quot;x\" tab=\"a&#x9;b\">t&lt;&gt;&#xD;&lt;raw&gt;</e><empty></empty><inner xmlns=\"urn:y\"></inner></doc>";

const EBICS_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<ebicsRequest xmlns="urn:org:ebics:H004" xmlns:ds="http://www.w3.org/2000/09/xmldsig#" Version="H004" Revision="1">
  <header authenticate="true">
    <static><HostID>EBIXHOST</HostID></static>
  </header>
  <AuthSignature/>
  <body><DataTransfer><SignatureData authenticate="true">abc</SignatureData></DataTransfer></body>
</ebicsRequest>"#;

#[test]
fn test_parse_tree() {
    let doc = Document::parse(EBICS_XML).unwrap();
    assert_eq!(doc.root.name, "ebicsRequest");
    assert_eq!(doc.root_namespace(), Some(H004_NS));
    assert_eq!(doc.root.attr("Version"), Some("H004"));

    let header = doc.root.child("header").unwrap();
    assert_eq!(header.attr("authenticate"), Some("true"));
    let host_id = header.child("static").unwrap().child("HostID").unwrap();
    assert_eq!(host_id.text(), "EBIXHOST");
    assert!(doc.expect_root(H004_NS, "ebicsRequest").is_ok());
    assert!(doc.expect_root(H004_NS, "ebicsResponse").is_err());
}

#[test]
fn test_canonicalize_whole_document() {
    let doc = Document::parse(MIXED_XML).unwrap();
    assert_eq!(canonicalize(&doc.root).unwrap(), MIXED_C14N);
}

#[test]
fn test_canonicalize_authenticated_subsets() {
    let doc = Document::parse(EBICS_XML).unwrap();
    let c14n = canonicalize_subsets(&doc.root, |e| e.attr("authenticate") == Some("true")).unwrap();
    assert_eq!(
        c14n,
        concat!(
            "<header xmlns=\"urn:org:ebics:H004\" xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\" authenticate=\"true\">\n",
            "    <static><HostID>EBIXHOST</HostID></static>\n",
            "  </header>",
            "<SignatureData xmlns=\"urn:org:ebics:H004\" xmlns:ds=\"http://www.w3.org/2000/09/xmldsig#\" authenticate=\"true\">abc</SignatureData>",
        )
    );
}

#[test]
fn test_write_then_parse_keeps_canonical_form() {
    let doc = Document::parse(MIXED_XML).unwrap();
    let reparsed = Document::parse(&doc.to_xml()).unwrap();
    assert_eq!(reparsed, doc);
    assert_eq!(canonicalize(&reparsed.root).unwrap(), MIXED_C14N);
}

#[test]
fn test_built_tree_serialization() {
    let doc = Document::new(
        Element::new("ebicsHEVRequest")
            .with_namespace(None, H000_NS)
            .with_child(Element::text_element("HostID", "A&B <bank>")),
    );
    let xml = doc.to_xml();
    assert!(xml.ends_with(
        "<ebicsHEVRequest xmlns=\"http://www.ebics.org/H000\"><HostID>A&amp;B &lt;bank&gt;</HostID></ebicsHEVRequest>"
    ));
    assert_eq!(Document::parse(&xml).unwrap().root.child("HostID").unwrap().text(), "A&B <bank>");
}

#[test]
fn test_rejects_malformed_documents() {
    for bad in [
        "<a><b></a>",
        "<a>",
        "<a/><b/>",
        "<ds:a/>",
        "<a x=\"1\" x=\"2\"/>",
        "<!DOCTYPE a [<!ENTITY e \"x\">]><a>&e;</a>",
        "<a>&unknown;</a>",
        "",
    ] {
        assert!(
            matches!(Document::parse(bad), Err(EbicsError::InvalidXml(_))),
            "accepted {bad:?}"
        );
    }
}

#[test]
fn test_child_cursor_enforces_order() {
    let doc = Document::parse("<r><a>1</a><b> 2 </b><c/><c/></r>").unwrap();

    let mut cursor = doc.root.cursor();
    assert_eq!(cursor.required_text("a").unwrap(), "1");
    assert_eq!(cursor.optional_text("x"), None);
    assert_eq!(cursor.required_text("b").unwrap(), "2");
    assert_eq!(cursor.repeated("c").len(), 2);
    assert!(cursor.finish().is_ok());

    let mut cursor = doc.root.cursor();
    assert!(cursor.required("b").is_err());

    let mut cursor = doc.root.cursor();
    cursor.required("a").unwrap();
    assert!(cursor.finish().is_err());
}
