//! Keyboard verbs: write, clear, press.

use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use serde_json::{json, Value};
use tracing::instrument;

use pagehand_core::{PagehandError, Result};
use pagehand_locator::Selector;

use crate::actions::{first_candidate, select_all_at};
use crate::config::{ActionResult, PressOptions, WriteOptions};
use crate::dom::PageDom;
use crate::session::Session;

/// How often the focus poll re-checks `document.hasFocus()`.
const FOCUS_POLL_INTERVAL: Duration = Duration::from_millis(500);

bitflags! {
    /// Keyboard modifier mask in CDP bit order.
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct KeyModifiers: u32 {
        const ALT = 1;
        const CTRL = 2;
        const META = 4;
        const SHIFT = 8;
    }
}

/// Inspect the focused element: can it take text, and should echoes be
/// masked?
const ACTIVE_ELEMENT_STATE: &str = "(() => { \
    const el = document.activeElement; \
    if (!el) { return { writable: false, masked: false }; } \
    const tag = el.tagName; \
    const writable = !el.disabled && !el.readOnly && \
        (tag === 'INPUT' || tag === 'TEXTAREA' || tag === 'SELECT' || el.isContentEditable); \
    return { writable: writable, masked: el.type === 'password' }; \
})()";

#[instrument(skip_all, fields(into = ?into.as_ref().map(|s| s.description())))]
pub(crate) async fn write(
    session: &Arc<Session>,
    dom: &PageDom,
    text: &str,
    into: Option<Selector>,
    options: &WriteOptions,
) -> Result<ActionResult> {
    let mut wait = session.wait_options(None);
    wait.await_navigation = options.await_navigation;

    let (result, _) = session
        .with_navigation(wait, &[], |client| async move {
            match &into {
                Some(selector) => {
                    let node = first_candidate(session, dom, selector).await?;
                    client.dom().focus(node).await.map_err(PagehandError::from)?;
                }
                None => wait_for_document_focus(session).await?,
            }

            let state = client
                .runtime()
                .evaluate(ACTIVE_ELEMENT_STATE)
                .await
                .map_err(PagehandError::from)?;
            let writable = state
                .get("writable")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !writable {
                return Err(PagehandError::InvalidOperation(
                    "the focused element is not writable; focus an input, textarea or editable element first"
                        .into(),
                ));
            }
            let masked = state
                .get("masked")
                .and_then(Value::as_bool)
                .unwrap_or(false);

            for ch in text.chars() {
                client
                    .input()
                    .key_event(json!({ "type": "char", "text": ch.to_string() }))
                    .await
                    .map_err(PagehandError::from)?;
                if !options.delay.is_zero() {
                    tokio::time::sleep(options.delay).await;
                }
            }

            let echoed = if masked { "*****".to_string() } else { format!("\"{text}\"") };
            let description = match &into {
                Some(selector) => format!("Wrote {echoed} into {}", selector.description()),
                None => format!("Wrote {echoed} into the focused element"),
            };
            Ok(ActionResult::new(description))
        })
        .await?;
    Ok(result)
}

/// Wait until the document reports focus, polling on a fixed cadence up to
/// the action timeout.
async fn wait_for_document_focus(session: &Arc<Session>) -> Result<()> {
    let client = session.client().await?;
    let deadline = tokio::time::Instant::now() + session.options.retry_timeout;
    loop {
        let focused = client
            .runtime()
            .evaluate("document.hasFocus()")
            .await
            .map_err(PagehandError::from)?
            .as_bool()
            .unwrap_or(false);
        if focused {
            return Ok(());
        }
        if tokio::time::Instant::now() + FOCUS_POLL_INTERVAL > deadline {
            return Err(PagehandError::InvalidOperation(
                "no element came into focus; pass a selector to write into".into(),
            ));
        }
        tokio::time::sleep(FOCUS_POLL_INTERVAL).await;
    }
}

/// Select everything in the target (or focused) field and delete it.
pub(crate) async fn clear(
    session: &Arc<Session>,
    dom: &PageDom,
    selector: Option<Selector>,
) -> Result<ActionResult> {
    let wait = session.wait_options(None);

    let (result, _) = session
        .with_navigation(wait, &[], |client| async move {
            let description = match &selector {
                Some(selector) => {
                    let node = first_candidate(session, dom, selector).await?;
                    client.dom().focus(node).await.map_err(PagehandError::from)?;
                    let (x, y) = client.dom().center(node).await.map_err(PagehandError::from)?;
                    select_all_at(&client, x, y).await?;
                    format!("Cleared {}", selector.description())
                }
                None => {
                    let state = client
                        .runtime()
                        .evaluate(ACTIVE_ELEMENT_STATE)
                        .await
                        .map_err(PagehandError::from)?;
                    if !state.get("writable").and_then(Value::as_bool).unwrap_or(false) {
                        return Err(PagehandError::InvalidOperation(
                            "the focused element is not writable".into(),
                        ));
                    }
                    let rect = client
                        .runtime()
                        .evaluate(
                            "(() => { const r = document.activeElement.getBoundingClientRect(); \
                             return { x: r.left + r.width / 2, y: r.top + r.height / 2 }; })()",
                        )
                        .await
                        .map_err(PagehandError::from)?;
                    let x = rect.get("x").and_then(Value::as_f64).unwrap_or(0.0);
                    let y = rect.get("y").and_then(Value::as_f64).unwrap_or(0.0);
                    select_all_at(&client, x, y).await?;
                    "Cleared the focused element".to_string()
                }
            };

            let backspace = key_definition("Backspace");
            client
                .input()
                .key_event(key_down_params(&backspace))
                .await
                .map_err(PagehandError::from)?;
            client
                .input()
                .key_event(key_up_params(&backspace))
                .await
                .map_err(PagehandError::from)?;
            Ok(ActionResult::new(description))
        })
        .await?;
    Ok(result)
}

/// Press a key or an ordered chord: downs in order, ups in reverse.
pub(crate) async fn press(
    session: &Arc<Session>,
    keys: &[String],
    options: &PressOptions,
) -> Result<ActionResult> {
    if keys.is_empty() {
        return Err(PagehandError::InvalidOperation("no keys to press".into()));
    }
    let mut wait = session.wait_options(None);
    wait.await_navigation = options.await_navigation;

    let (result, _) = session
        .with_navigation(wait, &[], |client| async move {
            let defs: Vec<KeyDefinition> =
                keys.iter().map(|k| key_definition(k)).collect();
            for def in &defs {
                client
                    .input()
                    .key_event(key_down_params(def))
                    .await
                    .map_err(PagehandError::from)?;
            }
            if let Some(delay) = options.delay {
                tokio::time::sleep(delay).await;
            }
            for def in defs.iter().rev() {
                client
                    .input()
                    .key_event(key_up_params(def))
                    .await
                    .map_err(PagehandError::from)?;
            }
            Ok(ActionResult::new(format!("Pressed {}", keys.join(" + "))))
        })
        .await?;
    Ok(result)
}

/// CDP key event fields for one key.
pub(crate) struct KeyDefinition {
    key: String,
    code: String,
    key_code: Option<i64>,
    text: Option<String>,
}

/// US-layout definitions for the named keys; single characters synthesize
/// their own entry.
pub(crate) fn key_definition(name: &str) -> KeyDefinition {
    const NAMED: &[(&str, &str, i64, Option<&str>)] = &[
        ("Enter", "Enter", 13, Some("\r")),
        ("Tab", "Tab", 9, None),
        ("Escape", "Escape", 27, None),
        ("Backspace", "Backspace", 8, None),
        ("Delete", "Delete", 46, None),
        ("ArrowUp", "ArrowUp", 38, None),
        ("ArrowDown", "ArrowDown", 40, None),
        ("ArrowLeft", "ArrowLeft", 37, None),
        ("ArrowRight", "ArrowRight", 39, None),
        ("Home", "Home", 36, None),
        ("End", "End", 35, None),
        ("PageUp", "PageUp", 33, None),
        ("PageDown", "PageDown", 34, None),
        ("Shift", "ShiftLeft", 16, None),
        ("Control", "ControlLeft", 17, None),
        ("Alt", "AltLeft", 18, None),
        ("Meta", "MetaLeft", 91, None),
        ("Space", "Space", 32, Some(" ")),
        ("Insert", "Insert", 45, None),
        ("F1", "F1", 112, None),
        ("F2", "F2", 113, None),
        ("F3", "F3", 114, None),
        ("F4", "F4", 115, None),
        ("F5", "F5", 116, None),
        ("F6", "F6", 117, None),
        ("F7", "F7", 118, None),
        ("F8", "F8", 119, None),
        ("F9", "F9", 120, None),
        ("F10", "F10", 121, None),
        ("F11", "F11", 122, None),
        ("F12", "F12", 123, None),
    ];

    if let Some(&(key, code, key_code, text)) =
        NAMED.iter().find(|(named, ..)| *named == name)
    {
        return KeyDefinition {
            key: key.to_string(),
            code: code.to_string(),
            key_code: Some(key_code),
            text: text.map(str::to_string),
        };
    }

    // A single printable character.
    let upper = name.to_uppercase();
    KeyDefinition {
        key: name.to_string(),
        code: if name.len() == 1 && name.chars().all(|c| c.is_ascii_alphabetic()) {
            format!("Key{upper}")
        } else {
            name.to_string()
        },
        key_code: None,
        text: Some(name.to_string()),
    }
}

fn key_down_params(def: &KeyDefinition) -> Value {
    let kind = if def.text.is_some() { "keyDown" } else { "rawKeyDown" };
    let mut params = json!({
        "type": kind,
        "key": def.key,
        "code": def.code,
    });
    if let Some(key_code) = def.key_code {
        params["windowsVirtualKeyCode"] = json!(key_code);
        params["nativeVirtualKeyCode"] = json!(key_code);
    }
    if let Some(text) = &def.text {
        params["text"] = json!(text);
        params["unmodifiedText"] = json!(text);
    }
    params
}

fn key_up_params(def: &KeyDefinition) -> Value {
    let mut params = json!({
        "type": "keyUp",
        "key": def.key,
        "code": def.code,
    });
    if let Some(key_code) = def.key_code {
        params["windowsVirtualKeyCode"] = json!(key_code);
        params["nativeVirtualKeyCode"] = json!(key_code);
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_keys_carry_their_codes() {
        let enter = key_definition("Enter");
        assert_eq!(enter.key, "Enter");
        assert_eq!(enter.key_code, Some(13));
        assert_eq!(enter.text.as_deref(), Some("\r"));

        let escape = key_definition("Escape");
        assert!(escape.text.is_none());
    }

    #[test]
    fn single_characters_synthesize_definitions() {
        let a = key_definition("a");
        assert_eq!(a.key, "a");
        assert_eq!(a.code, "KeyA");
        assert_eq!(a.text.as_deref(), Some("a"));
    }

    #[test]
    fn down_params_pick_event_type_from_text() {
        let enter = key_definition("Enter");
        assert_eq!(key_down_params(&enter)["type"], "keyDown");

        let shift = key_definition("Shift");
        assert_eq!(key_down_params(&shift)["type"], "rawKeyDown");
        assert_eq!(key_up_params(&shift)["type"], "keyUp");
    }
}
