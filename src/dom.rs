// Browser adapter: the live-DOM probe, the report transport, and the
// #[wasm_bindgen] facade that wires page signals into the engine.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Array, Date, Function, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, Element, HtmlMediaElement, Window, XmlHttpRequest};

use crate::engine::{PageProbe, ViewabilityEngine};
use crate::error::TrackerError;
use crate::report::{ReportEvent, ReportSink};
use crate::types::{ElementBox, HostCapabilities, TrackerConfig, UnitId, Viewport};

/// Live-DOM probe: one geometry read per call, nothing cached.
pub struct DomProbe {
    window: Window,
    viewport_offset_px: f64,
}

impl DomProbe {
    pub fn new(window: Window, viewport_offset_px: f64) -> Self {
        DomProbe {
            window,
            viewport_offset_px,
        }
    }
}

impl PageProbe<Element> for DomProbe {
    fn element_box(&self, handle: &Element) -> Option<ElementBox> {
        let rect = handle.get_bounding_client_rect();
        Some(ElementBox::new(
            rect.top(),
            rect.bottom(),
            rect.width(),
            rect.height(),
        ))
    }

    fn viewport(&self) -> Viewport {
        Viewport::from_window_height(window_height(&self.window), self.viewport_offset_px)
    }

    fn media_playing(&self, handle: &Element) -> bool {
        first_video(handle)
            .map(|video| !video.paused())
            .unwrap_or(false)
    }

    fn contains_media(&self, handle: &Element) -> bool {
        handle.get_elements_by_tag_name("video").length() > 0
    }
}

fn window_height(window: &Window) -> f64 {
    if let Some(height) = window.inner_height().ok().and_then(|v| v.as_f64()) {
        return height;
    }
    window
        .document()
        .and_then(|document| document.document_element())
        .map(|root| root.client_height() as f64)
        .unwrap_or(0.0)
}

fn first_video(element: &Element) -> Option<HtmlMediaElement> {
    element
        .get_elements_by_tag_name("video")
        .item(0)?
        .dyn_into::<HtmlMediaElement>()
        .ok()
}

/// Probe host facts once, at construction.
pub fn probe_capabilities(window: &Window) -> HostCapabilities {
    HostCapabilities {
        viewability_support: !in_foreign_frame(window),
        beacon_support: has_send_beacon(window),
        do_not_track: do_not_track_signaled(window),
    }
}

/// Geometry cannot be trusted when the page runs inside another frame.
fn in_foreign_frame(window: &Window) -> bool {
    match window.top() {
        Ok(Some(top)) => top != *window,
        _ => true,
    }
}

fn has_send_beacon(window: &Window) -> bool {
    let navigator = window.navigator();
    Reflect::has(navigator.as_ref(), &JsValue::from_str("sendBeacon")).unwrap_or(false)
}

/// The host signals do-not-track with "1" or "yes".
fn do_not_track_signaled(window: &Window) -> bool {
    let navigator = window.navigator();
    Reflect::get(navigator.as_ref(), &JsValue::from_str("doNotTrack"))
        .ok()
        .and_then(|value| value.as_string())
        .map(|value| value == "1" || value == "yes")
        .unwrap_or(false)
}

/// Delivers report events to the configured endpoint, preferring the
/// beacon API with a fire-and-forget XHR POST as fallback. Every
/// payload carries the page's session cookie id.
pub struct BeaconSink {
    window: Window,
    endpoint: Option<String>,
    beacon_support: bool,
}

impl BeaconSink {
    pub fn new(window: Window, endpoint: Option<String>, beacon_support: bool) -> Self {
        BeaconSink {
            window,
            endpoint,
            beacon_support,
        }
    }

    fn encode(&self, event: &ReportEvent) -> Result<String, TrackerError> {
        let mut value = serde_json::to_value(event)?;
        if let Some(fields) = value.as_object_mut() {
            fields.insert("cookie".to_string(), session_cookie_id(&self.window));
        }
        serde_json::to_string(&value).map_err(TrackerError::from)
    }
}

impl ReportSink for BeaconSink {
    fn send(&mut self, event: ReportEvent) {
        let endpoint = match &self.endpoint {
            Some(endpoint) => endpoint.clone(),
            None => {
                log::debug!("report endpoint unset, dropping event");
                return;
            }
        };
        let payload = match self.encode(&event) {
            Ok(payload) => payload,
            Err(err) => {
                log::warn!("failed to encode report: {}", err);
                return;
            }
        };
        log::debug!("report: {}", payload);
        if self.beacon_support {
            let navigator = self.window.navigator();
            if let Err(err) = navigator.send_beacon_with_opt_str(&endpoint, Some(&payload)) {
                log::warn!("beacon send failed: {:?}", err);
            }
            return;
        }
        if let Err(err) = post_xhr(&endpoint, &payload) {
            log::warn!("report delivery failed: {:?}", err);
        }
    }
}

fn post_xhr(endpoint: &str, payload: &str) -> Result<(), JsValue> {
    let request = XmlHttpRequest::new()?;
    request.open("POST", endpoint)?;
    request.set_request_header("Content-type", "application/x-www-form-urlencoded")?;
    request.send_with_opt_str(Some(payload))
}

/// Session id exposed by the page's id provider, -1 when absent.
fn session_cookie_id(window: &Window) -> serde_json::Value {
    lookup_cookie_id(window).unwrap_or_else(|| serde_json::Value::from(-1))
}

fn lookup_cookie_id(window: &Window) -> Option<serde_json::Value> {
    let provider = Reflect::get(window.as_ref(), &JsValue::from_str("IDCore")).ok()?;
    let get_id: Function = Reflect::get(&provider, &JsValue::from_str("getId"))
        .ok()?
        .dyn_into()
        .ok()?;
    let id = get_id.call0(&provider).ok()?;
    if let Some(number) = id.as_f64() {
        Some(serde_json::Value::from(number))
    } else {
        id.as_string().map(serde_json::Value::from)
    }
}

type SharedEngine = Rc<RefCell<ViewabilityEngine<Element>>>;

fn recheck_closure(engine: &SharedEngine, probe: &Rc<DomProbe>) -> Closure<dyn FnMut()> {
    let engine = Rc::clone(engine);
    let probe = Rc::clone(probe);
    Closure::wrap(Box::new(move || {
        engine.borrow_mut().recheck_all(probe.as_ref(), Date::now());
    }) as Box<dyn FnMut()>)
}

/// Page-level listeners plus the tick pump. Dropping unwires them.
struct PageHooks {
    window: Window,
    document: Document,
    interval_id: i32,
    _on_pump: Closure<dyn FnMut()>,
    on_visibility: Closure<dyn FnMut()>,
    on_scroll: Closure<dyn FnMut()>,
    on_resize: Closure<dyn FnMut()>,
    on_content_loaded: Closure<dyn FnMut()>,
    on_before_unload: Closure<dyn FnMut()>,
}

impl PageHooks {
    fn wire(
        window: &Window,
        document: &Document,
        engine: &SharedEngine,
        probe: &Rc<DomProbe>,
        pump_interval_ms: u64,
    ) -> Result<PageHooks, JsValue> {
        let on_pump = {
            let engine = Rc::clone(engine);
            Closure::wrap(Box::new(move || {
                engine.borrow_mut().advance(Date::now());
            }) as Box<dyn FnMut()>)
        };
        let interval_id = window.set_interval_with_callback_and_timeout_and_arguments_0(
            on_pump.as_ref().unchecked_ref(),
            pump_timeout_ms(pump_interval_ms),
        )?;

        let on_visibility = {
            let engine = Rc::clone(engine);
            let probe = Rc::clone(probe);
            let document = document.clone();
            Closure::wrap(Box::new(move || {
                let now = Date::now();
                if document.hidden() {
                    engine.borrow_mut().on_page_hidden(now);
                } else {
                    engine.borrow_mut().on_page_visible(probe.as_ref(), now);
                }
            }) as Box<dyn FnMut()>)
        };
        document.add_event_listener_with_callback(
            "visibilitychange",
            on_visibility.as_ref().unchecked_ref(),
        )?;

        let on_scroll = recheck_closure(engine, probe);
        window.add_event_listener_with_callback("scroll", on_scroll.as_ref().unchecked_ref())?;

        let on_resize = recheck_closure(engine, probe);
        window.add_event_listener_with_callback("resize", on_resize.as_ref().unchecked_ref())?;

        let on_content_loaded = {
            let engine = Rc::clone(engine);
            let probe = Rc::clone(probe);
            Closure::wrap(Box::new(move || {
                engine
                    .borrow_mut()
                    .on_content_loaded(probe.as_ref(), Date::now());
            }) as Box<dyn FnMut()>)
        };
        document.add_event_listener_with_callback(
            "DOMContentLoaded",
            on_content_loaded.as_ref().unchecked_ref(),
        )?;

        let on_before_unload = {
            let engine = Rc::clone(engine);
            Closure::wrap(Box::new(move || {
                engine.borrow_mut().on_unload(Date::now());
            }) as Box<dyn FnMut()>)
        };
        window.add_event_listener_with_callback(
            "beforeunload",
            on_before_unload.as_ref().unchecked_ref(),
        )?;

        Ok(PageHooks {
            window: window.clone(),
            document: document.clone(),
            interval_id,
            _on_pump: on_pump,
            on_visibility,
            on_scroll,
            on_resize,
            on_content_loaded,
            on_before_unload,
        })
    }
}

impl Drop for PageHooks {
    fn drop(&mut self) {
        self.window.clear_interval_with_handle(self.interval_id);
        let _ = self.document.remove_event_listener_with_callback(
            "visibilitychange",
            self.on_visibility.as_ref().unchecked_ref(),
        );
        let _ = self
            .window
            .remove_event_listener_with_callback("scroll", self.on_scroll.as_ref().unchecked_ref());
        let _ = self
            .window
            .remove_event_listener_with_callback("resize", self.on_resize.as_ref().unchecked_ref());
        let _ = self.document.remove_event_listener_with_callback(
            "DOMContentLoaded",
            self.on_content_loaded.as_ref().unchecked_ref(),
        );
        let _ = self.window.remove_event_listener_with_callback(
            "beforeunload",
            self.on_before_unload.as_ref().unchecked_ref(),
        );
    }
}

const MEDIA_EVENTS: [&str; 3] = ["loadeddata", "play", "pause"];

/// Playback listeners for one media unit. Each playback transition
/// triggers a full recheck, since layout may have shifted for every
/// unit. Dropping unwires them.
struct MediaHooks {
    owner: Element,
    video: HtmlMediaElement,
    on_playback: Closure<dyn FnMut()>,
}

impl MediaHooks {
    fn wire(
        owner: Element,
        video: HtmlMediaElement,
        engine: &SharedEngine,
        probe: &Rc<DomProbe>,
    ) -> Result<MediaHooks, JsValue> {
        let on_playback = recheck_closure(engine, probe);
        for event in MEDIA_EVENTS {
            video.add_event_listener_with_callback(event, on_playback.as_ref().unchecked_ref())?;
        }
        Ok(MediaHooks {
            owner,
            video,
            on_playback,
        })
    }
}

impl Drop for MediaHooks {
    fn drop(&mut self) {
        for event in MEDIA_EVENTS {
            let _ = self
                .video
                .remove_event_listener_with_callback(event, self.on_playback.as_ref().unchecked_ref());
        }
    }
}

/// Main tracker interface exposed to JavaScript.
///
/// Construction probes host capabilities and, unless `manual_init` is
/// set, wires the page listeners immediately.
#[wasm_bindgen]
pub struct Tracker {
    engine: SharedEngine,
    probe: Rc<DomProbe>,
    window: Window,
    document: Document,
    hooks: Option<PageHooks>,
    media_hooks: Vec<MediaHooks>,
    pump_interval_ms: u64,
}

#[wasm_bindgen]
impl Tracker {
    /// Build a tracker from a JSON configuration string; pass nothing
    /// for defaults.
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>) -> Result<Tracker, JsValue> {
        let config: TrackerConfig = match config_json.as_deref() {
            Some(raw) => serde_json::from_str(raw)
                .map_err(|e| js_err(TrackerError::InvalidConfig(e.to_string())))?,
            None => TrackerConfig::default(),
        };

        let window = web_sys::window()
            .ok_or_else(|| js_err(TrackerError::Dom("no window".to_string())))?;
        let document = window
            .document()
            .ok_or_else(|| js_err(TrackerError::Dom("no document".to_string())))?;

        let caps = probe_capabilities(&window);
        let manual_init = config.manual_init;
        let sink = BeaconSink::new(
            window.clone(),
            config.report_endpoint.clone(),
            caps.beacon_support,
        );
        let probe = Rc::new(DomProbe::new(window.clone(), config.viewport_offset_px));

        let now = Date::now();
        let mut engine = ViewabilityEngine::new(config, caps, Box::new(sink), now);
        if document.hidden() {
            engine.on_page_hidden(now);
        }
        let pump_interval_ms = engine.config().pump_interval_ms();
        let engine = Rc::new(RefCell::new(engine));

        let mut tracker = Tracker {
            engine,
            probe,
            window,
            document,
            hooks: None,
            media_hooks: Vec::new(),
            pump_interval_ms,
        };
        if !manual_init {
            tracker.init()?;
        }
        Ok(tracker)
    }

    /// Wire the page listeners and the tick pump. No-op when already
    /// wired.
    pub fn init(&mut self) -> Result<(), JsValue> {
        if self.hooks.is_some() {
            return Ok(());
        }
        self.hooks = Some(PageHooks::wire(
            &self.window,
            &self.document,
            &self.engine,
            &self.probe,
            self.pump_interval_ms,
        )?);
        // Content may already be past the loading phase, in which case
        // the DOMContentLoaded listener would never fire.
        if self.document.ready_state() != "loading" {
            self.engine
                .borrow_mut()
                .on_content_loaded(self.probe.as_ref(), Date::now());
        }
        Ok(())
    }

    /// Register a unit by element or CSS selector, with an optional
    /// report id (number or string). An unresolvable target reports a
    /// failed registration and is not retried.
    pub fn add_unit(&mut self, target: &JsValue, id: &JsValue) -> Result<(), JsValue> {
        let explicit_id = js_unit_id(id);
        let element = match resolve_element(&self.document, target)? {
            Some(element) => element,
            None => {
                self.engine.borrow_mut().reject_unit(explicit_id);
                return Ok(());
            }
        };
        let newly_tracked = self.engine.borrow().unit_id_for_handle(&element).is_none();
        self.engine
            .borrow_mut()
            .add_unit(element.clone(), explicit_id, self.probe.as_ref(), Date::now());
        if newly_tracked {
            if let Some(video) = first_video(&element) {
                self.media_hooks
                    .push(MediaHooks::wire(element, video, &self.engine, &self.probe)?);
            }
        }
        Ok(())
    }

    /// Register a batch of `{ banner, id }` entries, the shape used by
    /// declarative page-level setup.
    pub fn add_units(&mut self, entries: &JsValue) -> Result<(), JsValue> {
        if !Array::is_array(entries) {
            return Ok(());
        }
        for entry in Array::from(entries).iter() {
            let target =
                Reflect::get(&entry, &JsValue::from_str("banner")).unwrap_or(JsValue::UNDEFINED);
            if target.is_undefined() || target.is_null() {
                continue;
            }
            let id = Reflect::get(&entry, &JsValue::from_str("id")).unwrap_or(JsValue::UNDEFINED);
            self.add_unit(&target, &id)?;
        }
        Ok(())
    }

    /// Stop tracking a unit, addressed by element, by report id, or by
    /// CSS selector. Ids win over selectors for string arguments.
    pub fn remove_unit(&mut self, target: &JsValue) -> Result<bool, JsValue> {
        let handle = self.removal_handle(target)?;
        let removed = match &handle {
            Some(element) => self.engine.borrow_mut().remove_unit_by_handle(element),
            None => false,
        };
        if removed {
            if let Some(element) = handle {
                self.media_hooks.retain(|hooks| hooks.owner != element);
            }
        }
        Ok(removed)
    }

    /// Manually report a registered unit as viewable, addressed by
    /// element or by report id. Returns whether the unit is known.
    pub fn send_stat(&mut self, target: &JsValue) -> bool {
        let id = match target.dyn_ref::<Element>() {
            Some(element) => self.engine.borrow().unit_id_for_handle(element),
            None => js_unit_id(target),
        };
        match id {
            Some(id) => self.engine.borrow_mut().send_unit_stat(&id),
            None => false,
        }
    }

    /// Emit the end-of-session summary now. Also runs on the page's
    /// beforeunload signal.
    pub fn send_unload_stat(&mut self) {
        self.engine.borrow_mut().on_unload(Date::now());
    }

    fn removal_handle(&self, target: &JsValue) -> Result<Option<Element>, JsValue> {
        if let Some(element) = target.dyn_ref::<Element>() {
            return Ok(Some(element.clone()));
        }
        if let Some(id) = js_unit_id(target) {
            if let Some(element) = self.engine.borrow().unit_handle_by_id(&id) {
                return Ok(Some(element));
            }
        }
        match target.as_string() {
            Some(selector) => self.document.query_selector(&selector),
            None => Ok(None),
        }
    }
}

fn resolve_element(document: &Document, target: &JsValue) -> Result<Option<Element>, JsValue> {
    if let Some(selector) = target.as_string() {
        return document.query_selector(&selector);
    }
    Ok(target.dyn_ref::<Element>().cloned())
}

/// Host timers take an i32 delay; larger configured intervals saturate.
fn pump_timeout_ms(interval_ms: u64) -> i32 {
    i32::try_from(interval_ms).unwrap_or(i32::MAX)
}

fn js_unit_id(value: &JsValue) -> Option<UnitId> {
    if let Some(number) = value.as_f64() {
        if number.fract() == 0.0 {
            return Some(UnitId::Num(number as i64));
        }
        // Fractional numbers keep their decimal form as string ids.
        return Some(UnitId::Text(number.to_string()));
    }
    value.as_string().map(UnitId::Text)
}

fn js_err(err: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&err.to_string())
}
