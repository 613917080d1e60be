//! The selector model and its XPath/CSS compilation.

use serde::{Deserialize, Serialize};

use crate::relative::{RelativeConstraint, RelativeKind};

/// The element families the typed factories produce.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ElementKind {
    Link,
    ListItem,
    Button,
    TextField,
    InputField,
    FileField,
    CheckBox,
    RadioButton,
    ComboBox,
    Image,
}

impl ElementKind {
    fn noun(&self) -> &'static str {
        match self {
            ElementKind::Link => "link",
            ElementKind::ListItem => "list item",
            ElementKind::Button => "button",
            ElementKind::TextField => "text field",
            ElementKind::InputField => "input field",
            ElementKind::FileField => "file field",
            ElementKind::CheckBox => "checkbox",
            ElementKind::RadioButton => "radio button",
            ElementKind::ComboBox => "combo box",
            ElementKind::Image => "image",
        }
    }
}

/// How the base set of candidates is queried.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Query {
    /// Visible label or value, matched by containment, case-insensitive.
    Contains { text: String },
    /// Visible text matched exactly (after whitespace normalization).
    Exact { text: String },
    /// Attribute predicates; `class` matches by containment, the rest by
    /// equality.
    Attributes {
        tag: String,
        pairs: Vec<(String, String)>,
    },
    /// Raw XPath or CSS, told apart by a leading `//` or `(`.
    Raw { expr: String },
    /// A typed factory: element family plus label and/or attributes.
    Typed {
        kind: ElementKind,
        label: Option<String>,
        attrs: Vec<(String, String)>,
    },
}

/// One concrete query to run against the DOM.
#[derive(Clone, Debug, PartialEq)]
pub enum QueryPlan {
    Xpath(String),
    Css(String),
}

/// A full selector: base query plus any relative constraints.
#[derive(Clone, Debug, PartialEq)]
pub struct Selector {
    pub query: Query,
    pub relatives: Vec<RelativeConstraint>,
}

impl Selector {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            relatives: Vec::new(),
        }
    }

    pub fn contains(text: impl Into<String>) -> Self {
        Self::new(Query::Contains { text: text.into() })
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Query::Exact { text: text.into() })
    }

    pub fn raw(expr: impl Into<String>) -> Self {
        Self::new(Query::Raw { expr: expr.into() })
    }

    pub fn attributes(tag: impl Into<String>, pairs: Vec<(String, String)>) -> Self {
        Self::new(Query::Attributes {
            tag: tag.into(),
            pairs,
        })
    }

    pub fn typed(kind: ElementKind, label: Option<String>, attrs: Vec<(String, String)>) -> Self {
        Self::new(Query::Typed { kind, label, attrs })
    }

    pub fn kind(&self) -> Option<ElementKind> {
        match &self.query {
            Query::Typed { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    fn with_relative(mut self, kind: RelativeKind, anchor: Selector) -> Self {
        self.relatives.push(RelativeConstraint::new(kind, anchor));
        self
    }

    pub fn to_left_of(self, anchor: impl Into<Selector>) -> Self {
        self.with_relative(RelativeKind::LeftOf, anchor.into())
    }

    pub fn to_right_of(self, anchor: impl Into<Selector>) -> Self {
        self.with_relative(RelativeKind::RightOf, anchor.into())
    }

    pub fn above(self, anchor: impl Into<Selector>) -> Self {
        self.with_relative(RelativeKind::Above, anchor.into())
    }

    pub fn below(self, anchor: impl Into<Selector>) -> Self {
        self.with_relative(RelativeKind::Below, anchor.into())
    }

    pub fn near(self, anchor: impl Into<Selector>) -> Self {
        self.with_relative(RelativeKind::Near, anchor.into())
    }

    /// Human-readable description used in error messages and results.
    pub fn description(&self) -> String {
        let base = match &self.query {
            Query::Contains { text } => format!("element containing text \"{text}\""),
            Query::Exact { text } => format!("element with text \"{text}\""),
            Query::Attributes { tag, pairs } => {
                let attrs: Vec<String> =
                    pairs.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect();
                format!("<{tag}> with [{}]", attrs.join(", "))
            }
            Query::Raw { expr } => format!("custom selector {expr}"),
            Query::Typed { kind, label, attrs } => match label {
                Some(label) => format!("{} with label \"{label}\"", kind.noun()),
                None => {
                    let attrs: Vec<String> =
                        attrs.iter().map(|(k, v)| format!("{k}=\"{v}\"")).collect();
                    format!("{} with [{}]", kind.noun(), attrs.join(", "))
                }
            },
        };
        if self.relatives.is_empty() {
            base
        } else {
            let rels: Vec<String> = self.relatives.iter().map(|r| r.description()).collect();
            format!("{base} {}", rels.join(" and "))
        }
    }

    /// Compile the base query into plans, tried in order until one yields
    /// candidates.
    pub fn plans(&self) -> Vec<QueryPlan> {
        match &self.query {
            Query::Contains { text } => vec![
                QueryPlan::Xpath(format!("//*[contains(@value, {})]", xpath_literal(text))),
                QueryPlan::Xpath(contains_text_xpath(text)),
            ],
            Query::Exact { text } => vec![
                QueryPlan::Xpath(format!("//*[@value = {}]", xpath_literal(text))),
                QueryPlan::Xpath(exact_text_xpath(text)),
            ],
            Query::Attributes { tag, pairs } => {
                vec![QueryPlan::Xpath(attributes_xpath(tag, pairs))]
            }
            Query::Raw { expr } => {
                if expr.starts_with("//") || expr.starts_with('(') {
                    vec![QueryPlan::Xpath(expr.clone())]
                } else {
                    vec![QueryPlan::Css(expr.clone())]
                }
            }
            Query::Typed { kind, label, attrs } => typed_plans(*kind, label.as_deref(), attrs),
        }
    }
}

impl From<&str> for Selector {
    fn from(text: &str) -> Self {
        Selector::contains(text)
    }
}

impl From<String> for Selector {
    fn from(text: String) -> Self {
        Selector::contains(text)
    }
}

/// Quote arbitrary text as an XPath string literal. Text containing both
/// quote characters needs the `concat` form.
pub fn xpath_literal(text: &str) -> String {
    if !text.contains('\'') {
        format!("'{text}'")
    } else if !text.contains('"') {
        format!("\"{text}\"")
    } else {
        let parts: Vec<String> = text
            .split('\'')
            .map(|part| format!("'{part}'"))
            .collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";

/// Case-insensitive containment over normalized element text, restricted to
/// elements without a `<div>` descendant so that containers do not swallow
/// their children's matches.
fn contains_text_xpath(text: &str) -> String {
    format!(
        "//*[not(descendant::div) and contains(translate(normalize-space(.), '{UPPER}', '{LOWER}'), {})]",
        xpath_literal(&text.to_lowercase())
    )
}

fn exact_text_xpath(text: &str) -> String {
    format!(
        "//*[not(descendant::div) and translate(normalize-space(.), '{UPPER}', '{LOWER}') = {}]",
        xpath_literal(&text.to_lowercase())
    )
}

fn attributes_xpath(tag: &str, pairs: &[(String, String)]) -> String {
    let tag = if tag.is_empty() { "*" } else { tag };
    let preds: Vec<String> = pairs.iter().map(|(k, v)| attribute_predicate(k, v)).collect();
    format!("//{tag}{}", wrap_predicates(&preds))
}

fn attribute_predicate(name: &str, value: &str) -> String {
    if name == "class" {
        format!("contains(@class, {})", xpath_literal(value))
    } else {
        format!("@{name} = {}", xpath_literal(value))
    }
}

fn wrap_predicates(preds: &[String]) -> String {
    if preds.is_empty() {
        String::new()
    } else {
        format!("[{}]", preds.join(" and "))
    }
}

struct KindSpec {
    /// XPath node test plus type filter, e.g. `input[@type='checkbox']`.
    xpath_base: &'static str,
    /// CSS used when only attributes are given.
    css_base: &'static str,
    /// Whether the element's label is joined through `<label for=...>`.
    label_joined: bool,
    /// Whether a placeholder can stand in for the label.
    placeholder: bool,
}

fn kind_spec(kind: ElementKind) -> KindSpec {
    match kind {
        ElementKind::Link => KindSpec {
            xpath_base: "a",
            css_base: "a",
            label_joined: false,
            placeholder: false,
        },
        ElementKind::ListItem => KindSpec {
            xpath_base: "li",
            css_base: "li",
            label_joined: false,
            placeholder: false,
        },
        ElementKind::Button => KindSpec {
            xpath_base: "button",
            css_base: "button, input[type='submit'], input[type='button'], input[type='reset'], input[type='image']",
            label_joined: true,
            placeholder: false,
        },
        ElementKind::TextField => KindSpec {
            xpath_base: "input[not(@type) or @type='text' or @type='password' or @type='search' or @type='email' or @type='url' or @type='tel' or @type='number']",
            css_base: "input[type='text'], input:not([type]), textarea, *[contenteditable]",
            label_joined: true,
            placeholder: true,
        },
        ElementKind::InputField => KindSpec {
            xpath_base: "input",
            css_base: "input",
            label_joined: true,
            placeholder: true,
        },
        ElementKind::FileField => KindSpec {
            xpath_base: "input[@type='file']",
            css_base: "input[type='file']",
            label_joined: true,
            placeholder: false,
        },
        ElementKind::CheckBox => KindSpec {
            xpath_base: "input[@type='checkbox']",
            css_base: "input[type='checkbox']",
            label_joined: true,
            placeholder: false,
        },
        ElementKind::RadioButton => KindSpec {
            xpath_base: "input[@type='radio']",
            css_base: "input[type='radio']",
            label_joined: true,
            placeholder: false,
        },
        ElementKind::ComboBox => KindSpec {
            xpath_base: "select",
            css_base: "select",
            label_joined: true,
            placeholder: false,
        },
        ElementKind::Image => KindSpec {
            xpath_base: "img",
            css_base: "img",
            label_joined: false,
            placeholder: false,
        },
    }
}

/// Compile a typed factory into query plans.
///
/// With a label, inputs are joined to a nearby `<label>` via `for`/`id` or
/// by wrapping; without one, attribute-only lookups fall back to the
/// family's CSS.
fn typed_plans(kind: ElementKind, label: Option<&str>, attrs: &[(String, String)]) -> Vec<QueryPlan> {
    let spec = kind_spec(kind);
    let attr_preds: Vec<String> = attrs.iter().map(|(k, v)| attribute_predicate(k, v)).collect();
    let attr_frag = wrap_predicates(&attr_preds);

    let Some(label) = label else {
        if attr_preds.is_empty() {
            // Neither label nor attributes: every element of the family.
            return vec![QueryPlan::Xpath(format!("//{}{}", spec.xpath_base, attr_frag))];
        }
        return vec![
            QueryPlan::Xpath(format!("//{}{}", spec.xpath_base, attr_frag)),
            QueryPlan::Css(spec.css_base.to_string()),
        ];
    };

    let literal = xpath_literal(&label.to_lowercase());
    let label_text = format!(
        "contains(translate(normalize-space(), '{UPPER}', '{LOWER}'), {literal})"
    );
    let base = spec.xpath_base;

    let mut branches = Vec::new();
    if spec.label_joined {
        branches.push(format!(
            "//{base}{attr_frag}[@id = //label[{label_text}]/@for]"
        ));
        branches.push(format!("//label[{label_text}]//{base}{attr_frag}"));
        if spec.placeholder {
            branches.push(format!(
                "//{base}{attr_frag}[contains(translate(@placeholder, '{UPPER}', '{LOWER}'), {literal})]"
            ));
        }
    }
    match kind {
        ElementKind::Button => {
            branches.push(format!("//button{attr_frag}[{label_text}]"));
            branches.push(format!(
                "//input[(@type='submit' or @type='button' or @type='reset'){}][contains(translate(@value, '{UPPER}', '{LOWER}'), {literal})]",
                predicate_tail(&attr_preds)
            ));
        }
        ElementKind::Image => {
            branches.push(format!(
                "//img{attr_frag}[contains(translate(@alt, '{UPPER}', '{LOWER}'), {literal})]"
            ));
        }
        ElementKind::Link | ElementKind::ListItem => {
            branches.push(format!("//{base}{attr_frag}[{label_text}]"));
        }
        _ => {}
    }

    vec![QueryPlan::Xpath(branches.join(" | "))]
}

fn predicate_tail(preds: &[String]) -> String {
    if preds.is_empty() {
        String::new()
    } else {
        format!(" and {}", preds.join(" and "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_selectors_match_by_containment() {
        let selector: Selector = "Sign in".into();
        let plans = selector.plans();
        assert_eq!(plans.len(), 2);
        assert_eq!(
            plans[0],
            QueryPlan::Xpath("//*[contains(@value, 'Sign in')]".into())
        );
        match &plans[1] {
            QueryPlan::Xpath(expr) => {
                assert!(expr.contains("not(descendant::div)"));
                assert!(expr.contains("'sign in'"));
            }
            other => panic!("unexpected plan: {other:?}"),
        }
    }

    #[test]
    fn raw_expressions_are_classified_by_prefix() {
        assert_eq!(
            Selector::raw("//a[@href]").plans(),
            vec![QueryPlan::Xpath("//a[@href]".into())]
        );
        assert_eq!(
            Selector::raw("(//a)[1]").plans(),
            vec![QueryPlan::Xpath("(//a)[1]".into())]
        );
        assert_eq!(
            Selector::raw("#login > button").plans(),
            vec![QueryPlan::Css("#login > button".into())]
        );
    }

    #[test]
    fn class_attribute_matches_by_containment() {
        let selector = Selector::attributes(
            "div",
            vec![
                ("class".into(), "card".into()),
                ("role".into(), "dialog".into()),
            ],
        );
        assert_eq!(
            selector.plans(),
            vec![QueryPlan::Xpath(
                "//div[contains(@class, 'card') and @role = 'dialog']".into()
            )]
        );
    }

    #[test]
    fn labelled_checkbox_joins_through_label_for() {
        let selector = Selector::typed(ElementKind::CheckBox, Some("Remember me".into()), vec![]);
        let plans = selector.plans();
        assert_eq!(plans.len(), 1);
        let QueryPlan::Xpath(expr) = &plans[0] else {
            panic!("expected xpath")
        };
        assert!(expr.contains("@id = //label["));
        assert!(expr.contains("]/@for"));
        assert!(expr.contains("//label["));
        assert!(expr.contains("input[@type='checkbox']"));
    }

    #[test]
    fn attribute_only_factories_fall_back_to_css() {
        let selector = Selector::typed(
            ElementKind::TextField,
            None,
            vec![("name".into(), "q".into())],
        );
        let plans = selector.plans();
        assert_eq!(plans.len(), 2);
        assert!(matches!(&plans[1], QueryPlan::Css(_)));
    }

    #[test]
    fn xpath_literal_handles_quotes() {
        assert_eq!(xpath_literal("plain"), "'plain'");
        assert_eq!(xpath_literal("it's"), "\"it's\"");
        assert_eq!(
            xpath_literal("a'b\"c"),
            "concat('a', \"'\", 'b\"c')"
        );
    }

    #[test]
    fn descriptions_read_naturally() {
        let selector = Selector::typed(ElementKind::Link, Some("Delete".into()), vec![])
            .to_right_of(Selector::contains("Bob"));
        assert_eq!(
            selector.description(),
            "link with label \"Delete\" to right of element containing text \"Bob\""
        );
    }

    #[test]
    fn button_labels_match_input_values_too() {
        let selector = Selector::typed(ElementKind::Button, Some("Submit".into()), vec![]);
        let QueryPlan::Xpath(expr) = &selector.plans()[0] else {
            panic!("expected xpath")
        };
        assert!(expr.contains("//button"));
        assert!(expr.contains("@type='submit'"));
        assert!(expr.contains("@value"));
    }
}
