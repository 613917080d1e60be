//! Pagehand: Chromium automation over the DevTools protocol.
//!
//! Launches a Chromium-family browser, attaches over the CDP WebSocket and
//! exposes tolerant verbs for navigation, lookup and input. Selectors match
//! by visible label rather than brittle CSS paths, actions transparently
//! wait for the page to settle, and relative selectors disambiguate by
//! geometry.
//!
//! ```ignore
//! use pagehand::{button, link, to_right_of, Browser, BrowserOptions, ClickOptions};
//!
//! let browser = Browser::launch(BrowserOptions::default()).await?;
//! browser.goto("example.com", Default::default()).await?;
//! browser.click(link("More information"), ClickOptions::default()).await?;
//! browser.close().await?;
//! ```

mod actions;
mod browser;
mod config;
mod dialogs;
mod dom;
mod input;
mod intercept;
mod session;

pub use browser::Browser;
pub use config::{
    interval_secs, timeout_secs, ActionResult, BrowserOptions, ClickOptions, NavOptions,
    PressOptions, ScreenshotOptions, WriteOptions,
};
pub use dialogs::Dialog;
pub use input::KeyModifiers;
pub use intercept::{InterceptAction, InterceptedRequest};

pub use pagehand_bus::DialogKind;
pub use pagehand_core::{NodeId, PagehandError, Rect, Result, TargetDescriptor};
pub use pagehand_locator::{
    Element, ElementKind, RelativeConstraint, RelativeKind, Selector,
};

/// Label-or-attributes argument accepted by the typed selector factories.
pub enum FactoryArg {
    Label(String),
    Attrs(Vec<(String, String)>),
}

impl From<&str> for FactoryArg {
    fn from(label: &str) -> Self {
        FactoryArg::Label(label.to_string())
    }
}

impl From<String> for FactoryArg {
    fn from(label: String) -> Self {
        FactoryArg::Label(label)
    }
}

impl From<Vec<(&str, &str)>> for FactoryArg {
    fn from(attrs: Vec<(&str, &str)>) -> Self {
        FactoryArg::Attrs(
            attrs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

impl From<Vec<(String, String)>> for FactoryArg {
    fn from(attrs: Vec<(String, String)>) -> Self {
        FactoryArg::Attrs(attrs)
    }
}

fn typed(kind: ElementKind, arg: FactoryArg) -> Selector {
    match arg {
        FactoryArg::Label(label) => Selector::typed(kind, Some(label), Vec::new()),
        FactoryArg::Attrs(attrs) => Selector::typed(kind, None, attrs),
    }
}

/// Raw XPath (leading `//` or `(`) or CSS selector.
pub fn raw(expr: impl Into<String>) -> Selector {
    Selector::raw(expr)
}

/// Elements whose visible text or value contains `text`, case-insensitive.
pub fn contains(text: impl Into<String>) -> Selector {
    Selector::contains(text)
}

/// Elements whose normalized text equals `text`.
pub fn text(text: impl Into<String>) -> Selector {
    Selector::text(text)
}

pub fn link(arg: impl Into<FactoryArg>) -> Selector {
    typed(ElementKind::Link, arg.into())
}

pub fn list_item(arg: impl Into<FactoryArg>) -> Selector {
    typed(ElementKind::ListItem, arg.into())
}

pub fn button(arg: impl Into<FactoryArg>) -> Selector {
    typed(ElementKind::Button, arg.into())
}

pub fn text_field(arg: impl Into<FactoryArg>) -> Selector {
    typed(ElementKind::TextField, arg.into())
}

pub fn input_field(arg: impl Into<FactoryArg>) -> Selector {
    typed(ElementKind::InputField, arg.into())
}

pub fn file_field(arg: impl Into<FactoryArg>) -> Selector {
    typed(ElementKind::FileField, arg.into())
}

pub fn check_box(arg: impl Into<FactoryArg>) -> Selector {
    typed(ElementKind::CheckBox, arg.into())
}

pub fn radio_button(arg: impl Into<FactoryArg>) -> Selector {
    typed(ElementKind::RadioButton, arg.into())
}

pub fn combo_box(arg: impl Into<FactoryArg>) -> Selector {
    typed(ElementKind::ComboBox, arg.into())
}

pub fn image(arg: impl Into<FactoryArg>) -> Selector {
    typed(ElementKind::Image, arg.into())
}

/// Relative constraints; compose with the builder methods on [`Selector`]
/// or push onto `selector.relatives`.
pub fn to_left_of(anchor: impl Into<Selector>) -> RelativeConstraint {
    RelativeConstraint::new(RelativeKind::LeftOf, anchor.into())
}

pub fn to_right_of(anchor: impl Into<Selector>) -> RelativeConstraint {
    RelativeConstraint::new(RelativeKind::RightOf, anchor.into())
}

pub fn above(anchor: impl Into<Selector>) -> RelativeConstraint {
    RelativeConstraint::new(RelativeKind::Above, anchor.into())
}

pub fn below(anchor: impl Into<Selector>) -> RelativeConstraint {
    RelativeConstraint::new(RelativeKind::Below, anchor.into())
}

pub fn near(anchor: impl Into<Selector>) -> RelativeConstraint {
    RelativeConstraint::new(RelativeKind::Near, anchor.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factories_accept_labels_and_attribute_lists() {
        let by_label = button("Submit");
        assert_eq!(by_label.kind(), Some(ElementKind::Button));
        assert!(by_label.description().contains("Submit"));

        let by_attrs = text_field(vec![("name", "q")]);
        assert_eq!(by_attrs.kind(), Some(ElementKind::TextField));
        assert!(by_attrs.description().contains("name=\"q\""));
    }

    #[test]
    fn relative_free_functions_compose_onto_selectors() {
        let mut selector = link("Delete");
        selector.relatives.push(to_right_of(contains("Bob")));
        assert!(selector.description().contains("to right of"));
    }

    #[test]
    fn plain_strings_become_contains_selectors() {
        let selector: Selector = "Sign in".into();
        assert!(selector.description().contains("containing text"));
    }
}
