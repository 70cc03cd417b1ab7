use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use js_sys::{Array, Object, Reflect};
use selcap_protocol::{BridgeCall, BridgeEvent, BridgeRequest, Message, TabId, WindowId};
use serde::Serialize;
use serde_json::{Value, json};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{CloseEvent, ErrorEvent, MessageEvent, WebSocket};

const RELAY_URL: &str = "ws://127.0.0.1:19989/extension";
const RECONNECT_MS: i32 = 1000;
const LOG_LIMIT: usize = 40;
const MENU_ID: &str = "captureSelection";
// `selcap-ext-content` glue, then the loader that starts it.
const AGENT_SCRIPTS: [&str; 2] = ["content/selcap_ext_content.js", "content/boot.js"];

thread_local! {
    static LOG: RefCell<Vec<String>> = RefCell::new(Vec::new());
    static WS: RefCell<Option<Rc<WebSocket>>> = RefCell::new(None);
    // Windows whose panel a menu click already opened; see `open_panel`.
    static OPENED_BY_GESTURE: RefCell<HashSet<WindowId>> = RefCell::new(HashSet::new());
}

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    set_status("connecting", "selcap bridge (connecting)", [160, 160, 160, 255]);

    if let Err(err) = register_listeners() {
        set_status("error", &stringify_js_error(err.clone()), [200, 40, 40, 255]);
        push_log(&format!("listener setup failed: {}", stringify_js_error(err)));
    }
    connect();
}

fn connect() {
    if let Err(err) = open_socket() {
        push_log(&format!("connect failed: {}", stringify_js_error(err)));
        schedule_reconnect();
    }
}

fn schedule_reconnect() {
    let retry = Closure::once_into_js(connect);
    set_timeout(&retry, RECONNECT_MS);
}

fn open_socket() -> Result<(), JsValue> {
    let ws = Rc::new(WebSocket::new(RELAY_URL)?);
    WS.with(|w| *w.borrow_mut() = Some(ws.clone()));

    let onmessage = Closure::<dyn FnMut(MessageEvent)>::new(|event: MessageEvent| {
        wasm_bindgen_futures::spawn_local(async move {
            if let Err(err) = handle_request(event).await {
                push_log(&format!("request failed: {}", stringify_js_error(err)));
            }
        });
    });
    ws.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget();

    let onopen = Closure::<dyn FnMut()>::new(|| {
        set_status("connected", "selcap bridge connected", [30, 170, 80, 255]);
        push_log("connected");
    });
    ws.set_onopen(Some(onopen.as_ref().unchecked_ref()));
    onopen.forget();

    let onerror = Closure::<dyn FnMut(ErrorEvent)>::new(|e: ErrorEvent| {
        set_status("error", &e.message(), [200, 40, 40, 255]);
    });
    ws.set_onerror(Some(onerror.as_ref().unchecked_ref()));
    onerror.forget();

    let onclose = Closure::<dyn FnMut(CloseEvent)>::new(|_| {
        set_status("disconnected", "relay disconnected", [120, 120, 120, 255]);
        WS.with(|w| *w.borrow_mut() = None);
        schedule_reconnect();
    });
    ws.set_onclose(Some(onclose.as_ref().unchecked_ref()));
    onclose.forget();

    Ok(())
}

fn register_listeners() -> Result<(), JsValue> {
    let on_activated = Closure::<dyn FnMut(JsValue)>::new(|info: JsValue| {
        if let Some(tab_id) = get_i32(&info, "tabId") {
            forward(&BridgeEvent::TabActivated { tab_id });
        }
    });
    tabs_on_activated_add_listener(&on_activated);
    on_activated.forget();

    let on_updated = Closure::<dyn FnMut(JsValue, JsValue, JsValue)>::new(
        |tab_id: JsValue, change: JsValue, _tab: JsValue| {
            let status = get_string(&change, "status");
            if let (Some(tab_id), Some(status)) = (tab_id.as_f64(), status) {
                forward(&BridgeEvent::TabUpdated {
                    tab_id: tab_id as TabId,
                    status,
                });
            }
        },
    );
    tabs_on_updated_add_listener(&on_updated);
    on_updated.forget();

    // Only messages from capture agents carry a sender tab; panel traffic is ignored.
    let on_message = Closure::<dyn FnMut(JsValue, JsValue, JsValue)>::new(
        |message: JsValue, sender: JsValue, _respond: JsValue| {
            let tab_id = Reflect::get(&sender, &JsValue::from_str("tab"))
                .ok()
                .and_then(|tab| get_i32(&tab, "id"));
            let Some(tab_id) = tab_id else { return };
            match serde_wasm_bindgen::from_value::<Message>(message) {
                Ok(message) => forward(&BridgeEvent::AgentMessage { tab_id, message }),
                Err(err) => push_log(&format!("unrecognised agent message from tab {tab_id}: {err}")),
            }
        },
    );
    runtime_on_message_add_listener(&on_message);
    on_message.forget();

    let on_menu = Closure::<dyn FnMut(JsValue, JsValue)>::new(|info: JsValue, tab: JsValue| {
        if get_string(&info, "menuItemId").as_deref() != Some(MENU_ID) {
            return;
        }
        let Some(window_id) = get_i32(&tab, "windowId") else { return };
        let text = get_string(&info, "selectionText").unwrap_or_default();
        wasm_bindgen_futures::spawn_local(async move {
            // Opened here while the click still counts as a user gesture.
            match open_panel_now(window_id).await {
                Ok(()) => {
                    OPENED_BY_GESTURE.with(|w| w.borrow_mut().insert(window_id));
                    forward(&BridgeEvent::MenuInvoked { window_id, text });
                }
                Err(err) => push_log(&format!("panel open failed: {}", stringify_js_error(err))),
            }
        });
    });
    context_menus_on_clicked_add_listener(&on_menu);
    on_menu.forget();

    let on_installed = Closure::<dyn FnMut(JsValue)>::new(|_details: JsValue| {
        let props = json!({
            "id": MENU_ID,
            "title": "Capture selection",
            "contexts": ["selection"],
        });
        match to_js(&props) {
            Ok(props) => {
                context_menus_create(&props);
            }
            Err(err) => push_log(&format!("menu setup failed: {}", stringify_js_error(err))),
        }
    });
    runtime_on_installed_add_listener(&on_installed);
    on_installed.forget();

    let on_action = Closure::<dyn FnMut(JsValue)>::new(|tab: JsValue| {
        let Some(window_id) = get_i32(&tab, "windowId") else { return };
        wasm_bindgen_futures::spawn_local(async move {
            if let Err(err) = open_panel_now(window_id).await {
                push_log(&format!("panel open failed: {}", stringify_js_error(err)));
            }
        });
    });
    action_on_clicked_add_listener(&on_action);
    on_action.forget();

    Ok(())
}

async fn handle_request(event: MessageEvent) -> Result<(), JsValue> {
    let text = event.data().as_string().ok_or("non-text frame")?;
    let request: BridgeRequest =
        serde_json::from_str(&text).map_err(|e| JsValue::from_str(&e.to_string()))?;

    let id = request.id;
    let response = match execute(request.call).await {
        Ok(result) => BridgeEvent::Response {
            id,
            result: Some(result),
            error: None,
        },
        Err(err) => BridgeEvent::Response {
            id,
            result: None,
            error: Some(stringify_js_error(err)),
        },
    };
    send_event(&response)
}

async fn execute(call: BridgeCall) -> Result<Value, JsValue> {
    match call {
        BridgeCall::ActiveTab => Ok(active_tab().await?.map_or(Value::Null, Value::from)),
        BridgeCall::SendToTab { tab_id, message } => {
            let reply = JsFuture::from(tabs_send_message(tab_id, &to_js(&message)?)).await?;
            if reply.is_undefined() {
                return Err(JsValue::from_str("capture agent sent no reply"));
            }
            Ok(serde_wasm_bindgen::from_value(reply)?)
        }
        BridgeCall::InjectAgent { tab_id } => {
            let injection = to_js(&json!({
                "target": { "tabId": tab_id },
                "files": AGENT_SCRIPTS,
            }))?;
            JsFuture::from(scripting_execute_script(&injection)).await?;
            push_log(&format!("agent injected into tab {tab_id}"));
            Ok(Value::Null)
        }
        BridgeCall::OpenPanel { window_id } => {
            open_panel(window_id).await?;
            Ok(Value::Null)
        }
    }
}

/// `sidePanel.open` only works inside a user gesture, which the relay round trip loses. A
/// window whose panel the menu click already opened is answered from that.
async fn open_panel(window_id: WindowId) -> Result<(), JsValue> {
    if OPENED_BY_GESTURE.with(|w| w.borrow_mut().remove(&window_id)) {
        return Ok(());
    }
    open_panel_now(window_id).await
}

async fn open_panel_now(window_id: WindowId) -> Result<(), JsValue> {
    let options = to_js(&json!({ "windowId": window_id }))?;
    JsFuture::from(side_panel_open(&options)).await?;
    Ok(())
}

async fn active_tab() -> Result<Option<TabId>, JsValue> {
    let query = to_js(&json!({"active": true, "currentWindow": true}))?;
    let tabs_val = JsFuture::from(tabs_query(&query)).await?;
    let tabs = Array::from(&tabs_val);
    if tabs.length() == 0 {
        return Ok(None);
    }
    Ok(get_i32(&tabs.get(0), "id"))
}

fn forward(event: &BridgeEvent) {
    if let Err(err) = send_event(event) {
        push_log(&format!("dropped event: {}", stringify_js_error(err)));
    }
}

fn send_event(event: &BridgeEvent) -> Result<(), JsValue> {
    let ws = WS
        .with(|w| w.borrow().clone())
        .filter(|ws| ws.ready_state() == WebSocket::OPEN)
        .ok_or("relay not connected")?;
    ws.send_with_str(&serde_json::to_string(event).map_err(|e| JsValue::from_str(&e.to_string()))?)
}

fn to_js<T: Serialize>(value: &T) -> Result<JsValue, JsValue> {
    Ok(value.serialize(&serde_wasm_bindgen::Serializer::json_compatible())?)
}

fn get_i32(obj: &JsValue, key: &str) -> Option<i32> {
    Reflect::get(obj, &JsValue::from_str(key))
        .ok()?
        .as_f64()
        .map(|v| v as i32)
}

fn get_string(obj: &JsValue, key: &str) -> Option<String> {
    Reflect::get(obj, &JsValue::from_str(key)).ok()?.as_string()
}

fn stringify_js_error(err: JsValue) -> String {
    if let Some(message) = get_string(&err, "message") {
        return message;
    }
    err.as_string()
        .or_else(|| js_sys::JSON::stringify(&err).ok()?.as_string())
        .unwrap_or_else(|| format!("{:?}", err))
}

fn set_status(status: &str, title: &str, rgba: [u8; 4]) {
    let text = match status {
        "connected" => "ON",
        "error" => "ERR",
        "disconnected" => "OFF",
        _ => "...",
    };

    let color = Array::new();
    for c in rgba {
        color.push(&JsValue::from_f64(c as f64));
    }

    let text_obj = Object::new();
    let _ = Reflect::set(&text_obj, &JsValue::from_str("text"), &JsValue::from_str(text));
    action_set_badge_text(&text_obj);

    let color_obj = Object::new();
    let _ = Reflect::set(&color_obj, &JsValue::from_str("color"), &color);
    action_set_badge_background_color(&color_obj);

    let title_obj = Object::new();
    let _ = Reflect::set(&title_obj, &JsValue::from_str("title"), &JsValue::from_str(title));
    action_set_title(&title_obj);

    persist("selcap_bridge_state", &to_js(&json!({"status": status, "message": title})).unwrap_or_default());
}

fn push_log(line: &str) {
    web_sys::console::log_1(&JsValue::from_str(line));
    LOG.with(|log| {
        let mut vec = log.borrow_mut();
        vec.push(line.to_string());
        if vec.len() > LOG_LIMIT {
            let excess = vec.len() - LOG_LIMIT;
            vec.drain(0..excess);
        }
        let array: Array = vec.iter().map(|line| JsValue::from_str(line)).collect();
        persist("selcap_bridge_log", &array);
    });
}

fn persist(key: &str, value: &JsValue) {
    let obj = Object::new();
    let _ = Reflect::set(&obj, &JsValue::from_str(key), value);
    let _ = storage_local_set(&obj);
}

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_name = setTimeout)]
    fn set_timeout(handler: &JsValue, timeout: i32) -> JsValue;

    #[wasm_bindgen(js_namespace = ["chrome", "tabs"], js_name = query)]
    fn tabs_query(query: &JsValue) -> js_sys::Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "tabs"], js_name = sendMessage)]
    fn tabs_send_message(tab_id: i32, message: &JsValue) -> js_sys::Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "tabs", "onActivated"], js_name = addListener)]
    fn tabs_on_activated_add_listener(cb: &Closure<dyn FnMut(JsValue)>);

    #[wasm_bindgen(js_namespace = ["chrome", "tabs", "onUpdated"], js_name = addListener)]
    fn tabs_on_updated_add_listener(cb: &Closure<dyn FnMut(JsValue, JsValue, JsValue)>);

    #[wasm_bindgen(js_namespace = ["chrome", "runtime", "onMessage"], js_name = addListener)]
    fn runtime_on_message_add_listener(cb: &Closure<dyn FnMut(JsValue, JsValue, JsValue)>);

    #[wasm_bindgen(js_namespace = ["chrome", "runtime", "onInstalled"], js_name = addListener)]
    fn runtime_on_installed_add_listener(cb: &Closure<dyn FnMut(JsValue)>);

    #[wasm_bindgen(js_namespace = ["chrome", "scripting"], js_name = executeScript)]
    fn scripting_execute_script(injection: &JsValue) -> js_sys::Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "sidePanel"], js_name = open)]
    fn side_panel_open(options: &JsValue) -> js_sys::Promise;

    #[wasm_bindgen(js_namespace = ["chrome", "contextMenus"], js_name = create)]
    fn context_menus_create(props: &JsValue) -> JsValue;

    #[wasm_bindgen(js_namespace = ["chrome", "contextMenus", "onClicked"], js_name = addListener)]
    fn context_menus_on_clicked_add_listener(cb: &Closure<dyn FnMut(JsValue, JsValue)>);

    #[wasm_bindgen(js_namespace = ["chrome", "action", "onClicked"], js_name = addListener)]
    fn action_on_clicked_add_listener(cb: &Closure<dyn FnMut(JsValue)>);

    #[wasm_bindgen(js_namespace = ["chrome", "action"], js_name = setBadgeText)]
    fn action_set_badge_text(details: &JsValue);

    #[wasm_bindgen(js_namespace = ["chrome", "action"], js_name = setBadgeBackgroundColor)]
    fn action_set_badge_background_color(details: &JsValue);

    #[wasm_bindgen(js_namespace = ["chrome", "action"], js_name = setTitle)]
    fn action_set_title(details: &JsValue);

    #[wasm_bindgen(js_namespace = ["chrome", "storage", "local"], js_name = set)]
    fn storage_local_set(items: &JsValue) -> js_sys::Promise;
}
