//! The lottery site's markup contract, as JavaScript locators.
//!
//! Every [`ControlKind`] maps to a JS expression that evaluates to an array of
//! elements in document order. A control's ordinal is its index in that array.

use stagedoor_engine::{ControlKind, FormField};

/// Helpers shared by every script: visibility and label lookup.
const PRELUDE: &str = r#"
const __visible = (el) => {
  if (!el) return false;
  const r = el.getBoundingClientRect();
  const s = window.getComputedStyle(el);
  return r.width > 0 && r.height > 0 && s.visibility !== 'hidden' && s.display !== 'none';
};
const __text = (el) => ((el.innerText || el.textContent || '') + '').trim();
const __byLabel = (wanted) => {
  const w = wanted.toLowerCase();
  const out = [];
  for (const label of document.querySelectorAll('label')) {
    if (!__text(label).toLowerCase().startsWith(w)) continue;
    const target = label.htmlFor
      ? document.getElementById(label.htmlFor)
      : label.querySelector('input, select, textarea');
    if (target && !out.includes(target)) out.push(target);
  }
  for (const el of document.querySelectorAll('[aria-label]')) {
    if (el.getAttribute('aria-label').trim().toLowerCase() === w && !out.includes(el)) out.push(el);
  }
  return out;
};
const __byText = (selector, re) =>
  Array.from(document.querySelectorAll(selector)).filter((el) => re.test(__text(el)));
"#;

/// JS expression producing the elements for `kind`.
pub fn locator(kind: ControlKind) -> String {
    match kind {
        ControlKind::OpenEntry => {
            r#"__byText('a', /enter/i).filter((a) => __visible(a) && !/closed|upcoming|soon/i.test(a.className + ' ' + __text(a)))"#
                .into()
        }
        ControlKind::ClosedEntry => {
            r#"__byText('a, button, span, div.btn, .lottery-status', /^(closed|upcoming|coming soon|opens\b)/i).filter(__visible)"#
                .into()
        }
        ControlKind::OverlayDismiss => {
            r#"Array.from(document.querySelectorAll('#onetrust-accept-btn-handler, .cookie-accept, [aria-label="Close"], .modal .close, button.close, .popup-close')).filter(__visible)"#
                .into()
        }
        ControlKind::Field(field) => field_locator(field),
        ControlKind::AgreeTerms => "Array.from(document.querySelectorAll('#dlslot_agree'))".into(),
        ControlKind::Submit => {
            r#"__byLabel('Enter').concat(Array.from(document.querySelectorAll('input[type=submit][value="Enter" i], button[type=submit]'))).filter((el, i, all) => all.indexOf(el) === i)"#
                .into()
        }
        ControlKind::Confirmation => {
            r#"(() => {
  const marked = Array.from(document.querySelectorAll('.thank-you, .lottery-confirmation, .success-message, [class*="thank"]')).filter(__visible);
  if (marked.length) return marked;
  const body = document.body ? __text(document.body) : '';
  return /thank you for entering|entry (has been )?received|successfully entered/i.test(body) ? [document.body] : [];
})()"#
                .into()
        }
    }
}

fn field_locator(field: FormField) -> String {
    match field {
        FormField::FirstName => by_label("First Name"),
        FormField::LastName => by_label("Last Name"),
        FormField::TicketQuantity => by_label("Qty of Tickets Requested"),
        FormField::Email => by_label("Email"),
        FormField::BirthMonth => by_id("dlslot_dob_month"),
        FormField::BirthDay => by_id("dlslot_dob_day"),
        FormField::BirthYear => by_id("dlslot_dob_year"),
        FormField::Zip => by_label("Zip"),
        FormField::Country => by_label("Country of Residence"),
    }
}

fn by_label(label: &str) -> String {
    format!("__byLabel({})", js_string(label))
}

fn by_id(id: &str) -> String {
    format!("Array.from(document.querySelectorAll('#{id}'))")
}

/// A JS string literal for `value`.
pub fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

/// Wrap `body` in an IIFE with the helpers in scope.
fn script(body: &str) -> String {
    format!("(() => {{{PRELUDE}\n{body}\n}})()")
}

/// Returns `[{ ordinal, href }]` for every control of `kind`.
pub fn find_script(kind: ControlKind) -> String {
    script(&format!(
        "return ({}).map((el, i) => ({{ ordinal: i, href: (el.tagName === 'A' && el.href && !el.href.startsWith('javascript:')) ? el.href : null }}));",
        locator(kind)
    ))
}

/// Fills an input, or picks a select option by value or visible label.
/// Returns `"ok"`, `"missing"`, or `"no-option"`.
pub fn fill_script(kind: ControlKind, ordinal: usize, value: &str) -> String {
    script(&format!(
        r#"const el = ({loc})[{ordinal}];
if (!el) return 'missing';
const v = {value};
if (el.tagName === 'SELECT') {{
  const w = v.toLowerCase();
  const opt = Array.from(el.options).find((o) => o.value.toLowerCase() === w || o.text.trim().toLowerCase() === w);
  if (!opt) return 'no-option';
  el.value = opt.value;
}} else {{
  el.focus();
  el.value = v;
}}
el.dispatchEvent(new Event('input', {{ bubbles: true }}));
el.dispatchEvent(new Event('change', {{ bubbles: true }}));
return 'ok';"#,
        loc = locator(kind),
        value = js_string(value),
    ))
}

/// Clicks a control. An already checked checkbox is left alone.
pub fn click_script(kind: ControlKind, ordinal: usize) -> String {
    script(&format!(
        r#"const el = ({loc})[{ordinal}];
if (!el) return 'missing';
el.scrollIntoView({{ block: 'center' }});
if (el.type === 'checkbox' && el.checked) return 'ok';
el.click();
return 'ok';"#,
        loc = locator(kind),
    ))
}

pub fn visible_text_script(probe: &str) -> String {
    format!(
        "(() => !!document.body && document.body.innerText.toLowerCase().includes({}))()",
        js_string(&probe.to_lowercase())
    )
}

pub const BODY_LENGTH_SCRIPT: &str =
    "(() => document.body ? document.body.innerText.trim().length : 0)()";

pub const TITLE_SCRIPT: &str = "document.title";

pub fn pointer_script(x: f64, y: f64) -> String {
    format!(
        "(() => {{ const t = document.elementFromPoint({x}, {y}) || document.body; if (t) t.dispatchEvent(new MouseEvent('mousemove', {{ clientX: {x}, clientY: {y}, bubbles: true }})); return true; }})()"
    )
}

pub fn scroll_script(delta_y: f64) -> String {
    format!("(() => {{ window.scrollBy({{ top: {delta_y}, behavior: 'smooth' }}); return true; }})()")
}
