//! Small navigation helpers over `roxmltree` nodes.
//!
//! Catalog documents mark missing numbers with words such as `Unknown`, so
//! every numeric read goes through [`parse_optional_number`] and yields `None`
//! instead of an error.

use roxmltree::Node;

/// Parse a signed integer; anything that is not one (including "Unknown") is absent.
pub fn parse_optional_number(text: &str) -> Option<i32> {
    text.trim().parse::<i32>().ok()
}

/// First child element named `name`
pub fn child<'a, 'input>(node: Node<'a, 'input>, name: &str) -> Option<Node<'a, 'input>> {
    node.children().find(|n| n.has_tag_name(name))
}

/// All child elements named `name`
pub fn children<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.children().filter(move |n| n.has_tag_name(name))
}

/// All descendant elements named `name`
pub fn descendants<'a, 'input: 'a>(
    node: Node<'a, 'input>,
    name: &'a str,
) -> impl Iterator<Item = Node<'a, 'input>> + 'a {
    node.descendants().filter(move |n| n.has_tag_name(name))
}

/// Trimmed text of the child `name`, empty when missing
pub fn text_of(node: Node<'_, '_>, name: &str) -> String {
    child(node, name)
        .and_then(|n| n.text())
        .map(|t| t.trim().to_string())
        .unwrap_or_default()
}

/// Numeric text content of the child `name`
pub fn number_of(node: Node<'_, '_>, name: &str) -> Option<i32> {
    child(node, name)
        .and_then(|n| n.text())
        .and_then(parse_optional_number)
}

/// Numeric `value` attribute of the child `name`
pub fn value_of(node: Node<'_, '_>, name: &str) -> Option<i32> {
    child(node, name)
        .and_then(|n| n.attribute("value"))
        .and_then(parse_optional_number)
}

/// Numeric attribute of the node itself
pub fn attr_number(node: Node<'_, '_>, attr: &str) -> Option<i32> {
    node.attribute(attr).and_then(parse_optional_number)
}

/// Attribute as a non-negative index (vehicle and event numbers)
pub fn attr_index(node: Node<'_, '_>, attr: &str) -> Option<u32> {
    attr_number(node, attr).and_then(|n| u32::try_from(n).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_optional_number() {
        assert_eq!(parse_optional_number(" 42 "), Some(42));
        assert_eq!(parse_optional_number("-7"), Some(-7));
        assert_eq!(parse_optional_number("Unknown"), None);
        assert_eq!(parse_optional_number("12.5"), None);
        assert_eq!(parse_optional_number(""), None);
    }

    #[test]
    fn test_navigation() {
        let xml = r#"<Root id="3">
            <Item value="5">first</Item>
            <Item value="Unknown">second</Item>
            <Weight>1500</Weight>
            <Nested><Deep value="9"/></Nested>
        </Root>"#;
        let doc = roxmltree::Document::parse(xml).unwrap();
        let root = doc.root_element();

        assert_eq!(attr_index(root, "id"), Some(3));
        assert_eq!(children(root, "Item").count(), 2);
        assert_eq!(value_of(root, "Item"), Some(5));
        assert_eq!(text_of(root, "Item"), "first");
        assert_eq!(number_of(root, "Weight"), Some(1500));
        assert_eq!(text_of(root, "Missing"), "");
        assert_eq!(descendants(root, "Deep").count(), 1);
    }
}
