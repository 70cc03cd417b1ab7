//! In-page capture agent. The bridge injects it into a tab whose agent did not answer; it then
//! serves capture directives and content queries sent with `chrome.tabs.sendMessage` and
//! reports selections with `chrome.runtime.sendMessage`.

mod capture;

use std::cell::{Cell, RefCell};

use capture::{Capture, Transition};
use selcap_protocol::{Message, Reply};
use serde::Serialize;
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;

const DEBOUNCE_MS: i32 = 300;
const SELECTION_EVENTS: [&str; 3] = ["mouseup", "keyup", "selectionchange"];

thread_local! {
    static CAPTURE: RefCell<Capture> = RefCell::new(Capture::default());
    static PENDING: Cell<Option<i32>> = const { Cell::new(None) };
    static ON_EVENT: Closure<dyn FnMut()> = Closure::new(schedule_report);
    static ON_QUIET: Closure<dyn FnMut()> = Closure::new(on_quiet);
}

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();

    let on_message = Closure::<dyn FnMut(JsValue, JsValue, JsValue)>::new(
        |message: JsValue, _sender: JsValue, respond: JsValue| {
            // Other extension traffic is not ours to answer.
            let Ok(message) = serde_wasm_bindgen::from_value::<Message>(message) else {
                return;
            };
            let Some(reply) = handle(message) else { return };
            let Some(respond) = respond.dyn_ref::<js_sys::Function>() else { return };
            match to_js(&reply) {
                Ok(reply) => {
                    if let Err(err) = respond.call1(&JsValue::NULL, &reply) {
                        log(&format!("reply failed: {err:?}"));
                    }
                }
                Err(err) => log(&format!("reply encoding failed: {err:?}")),
            }
        },
    );
    runtime_on_message_add_listener(&on_message);
    on_message.forget();
}

fn handle(message: Message) -> Option<Reply> {
    match message {
        Message::SetCapture { enabled } => Some(Reply::Ack {
            success: set_capture(enabled),
        }),
        Message::GetPageContent => Some(capture::page_content(&live_selection(), page_text)),
        Message::GetSelectedText => Some(capture::selected_text(&live_selection())),
        Message::ReportSelection { .. } | Message::RelaySelection { .. } => None,
    }
}

/// Applies a capture directive. Returns `false` when the listeners could not be attached.
fn set_capture(enabled: bool) -> bool {
    let transition = CAPTURE.with(|capture| capture.borrow_mut().set_enabled(enabled));
    match transition {
        Transition::Attach => {
            if let Err(err) = set_listeners(true) {
                log(&format!("listener setup failed: {err:?}"));
                CAPTURE.with(|capture| capture.borrow_mut().set_enabled(false));
                return false;
            }
            // A selection made before capture was enabled is reported right away.
            report_selection();
        }
        Transition::Detach => {
            cancel_pending();
            if let Err(err) = set_listeners(false) {
                log(&format!("listener removal failed: {err:?}"));
            }
        }
        Transition::Unchanged => {}
    }
    true
}

fn set_listeners(attach: bool) -> Result<(), JsValue> {
    let document = web_sys::window()
        .and_then(|window| window.document())
        .ok_or("no document")?;
    ON_EVENT.with(|callback| {
        let callback: &js_sys::Function = callback.as_ref().unchecked_ref();
        for event in SELECTION_EVENTS {
            if attach {
                document.add_event_listener_with_callback(event, callback)?;
            } else {
                document.remove_event_listener_with_callback(event, callback)?;
            }
        }
        Ok(())
    })
}

fn schedule_report() {
    let Some(window) = web_sys::window() else { return };
    if let Some(handle) = PENDING.take() {
        window.clear_timeout_with_handle(handle);
    }
    let handle = ON_QUIET.with(|callback| {
        window.set_timeout_with_callback_and_timeout_and_arguments_0(callback.as_ref().unchecked_ref(), DEBOUNCE_MS)
    });
    match handle {
        Ok(handle) => PENDING.set(Some(handle)),
        Err(err) => log(&format!("debounce timer failed: {err:?}")),
    }
}

fn on_quiet() {
    PENDING.set(None);
    if CAPTURE.with(|capture| capture.borrow().is_enabled()) {
        report_selection();
    }
}

fn cancel_pending() {
    if let (Some(handle), Some(window)) = (PENDING.take(), web_sys::window()) {
        window.clear_timeout_with_handle(handle);
    }
}

fn report_selection() {
    let selection = live_selection();
    let Some(text) = CAPTURE.with(|capture| capture.borrow_mut().take_report(&selection)) else {
        return;
    };
    let message = match to_js(&Message::ReportSelection { text }) {
        Ok(message) => message,
        Err(err) => {
            log(&format!("report encoding failed: {err:?}"));
            return;
        }
    };
    let sent = runtime_send_message(&message);
    wasm_bindgen_futures::spawn_local(async move {
        if let Err(err) = JsFuture::from(sent).await {
            log(&format!("report failed: {err:?}"));
        }
    });
}

fn live_selection() -> String {
    web_sys::window()
        .and_then(|window| window.get_selection().ok().flatten())
        .map(|selection| String::from(selection.to_string()))
        .unwrap_or_default()
}

fn page_text() -> String {
    web_sys::window()
        .and_then(|window| window.document())
        .and_then(|document| document.body())
        .map(|body| body.inner_text())
        .unwrap_or_default()
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, serde_wasm_bindgen::Error> {
    value.serialize(&serde_wasm_bindgen::Serializer::json_compatible())
}

fn log(line: &str) {
    web_sys::console::log_1(&JsValue::from_str(&format!("selcap: {line}")));
}

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = ["chrome", "runtime"], js_name = sendMessage)]
    fn runtime_send_message(message: &JsValue) -> js_sys::Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "runtime", "onMessage"], js_name = addListener)]
    fn runtime_on_message_add_listener(cb: &Closure<dyn FnMut(JsValue, JsValue, JsValue)>);
}
