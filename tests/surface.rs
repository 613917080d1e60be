//! Public-surface checks: selector composition, result shapes, error
//! wording, and the relative-ordering laws.

use pagehand::{
    button, check_box, combo_box, contains, link, text, text_field, to_right_of, ActionResult,
    ElementKind, PagehandError, Rect, RelativeKind, Selector,
};

#[test]
fn factories_produce_typed_selectors() {
    assert_eq!(button("Save").kind(), Some(ElementKind::Button));
    assert_eq!(check_box("Agree").kind(), Some(ElementKind::CheckBox));
    assert_eq!(combo_box("Country").kind(), Some(ElementKind::ComboBox));
    assert_eq!(
        text_field(vec![("name", "email")]).kind(),
        Some(ElementKind::TextField)
    );
    assert_eq!(text("Done").kind(), None);
}

#[test]
fn relative_builders_and_free_functions_agree() {
    let built = link("Delete").to_right_of(contains("Bob"));

    let mut assembled = link("Delete");
    assembled.relatives.push(to_right_of(contains("Bob")));

    assert_eq!(built, assembled);
    assert_eq!(
        built.description(),
        "link with label \"Delete\" to right of element containing text \"Bob\""
    );
}

#[test]
fn selector_descriptions_surface_in_not_found_errors() {
    let selector: Selector = link("Sign out").to_left_of(text("Profile"));
    let err = PagehandError::ElementNotFound {
        selector: selector.description(),
    };
    let message = err.to_string();
    assert!(message.contains("Sign out"));
    assert!(message.contains("to left of"));
}

#[test]
fn too_many_matches_asks_for_a_better_selector() {
    let err = PagehandError::TooManyMatches {
        selector: button("Edit").description(),
        count: 23,
    };
    let message = err.to_string();
    assert!(message.contains("23"));
    assert!(message.contains("Please provide a better selector"));
}

#[test]
fn navigation_failure_names_url_and_reason() {
    let err = PagehandError::NavigationFailed {
        url: "http://down.example".into(),
        reason: "net::ERR_NAME_NOT_RESOLVED".into(),
    };
    assert_eq!(
        err.to_string(),
        "Navigation to url http://down.example failed. REASON: net::ERR_NAME_NOT_RESOLVED"
    );
}

#[test]
fn action_results_serialize_like_the_wire_shape() {
    let result = ActionResult::with_url("Navigated to url \"http://example.com\"", "http://example.com");
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["description"], "Navigated to url \"http://example.com\"");
    assert_eq!(json["url"], "http://example.com");
}

// Relative-ordering laws: toLeftOf accepts C iff rect(C).left < rect(A).left,
// and the analogues; near accepts iff the minimal edge distance is <= 30.
#[test]
fn relative_ordering_laws_hold() {
    let anchor = Rect::new(100.0, 100.0, 200.0, 150.0);

    let left = Rect::new(20.0, 100.0, 95.0, 150.0);
    let right = Rect::new(150.0, 100.0, 260.0, 150.0);
    let above = Rect::new(100.0, 10.0, 200.0, 90.0);
    let below = Rect::new(100.0, 160.0, 200.0, 220.0);

    assert!(RelativeKind::LeftOf.accepts(&left, &anchor));
    assert!(!RelativeKind::LeftOf.accepts(&right, &anchor));
    assert!(RelativeKind::RightOf.accepts(&right, &anchor));
    assert!(!RelativeKind::RightOf.accepts(&left, &anchor));
    assert!(RelativeKind::Above.accepts(&above, &anchor));
    assert!(RelativeKind::Below.accepts(&below, &anchor));

    let near = Rect::new(205.0, 100.0, 230.0, 150.0);
    let far = Rect::new(300.0, 300.0, 340.0, 340.0);
    assert!(RelativeKind::Near.accepts(&near, &anchor));
    assert!(!RelativeKind::Near.accepts(&far, &anchor));
}
