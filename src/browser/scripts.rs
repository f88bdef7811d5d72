//! Page-side JavaScript evaluated through CDP. Every script returns a JSON
//! string so results cross the protocol boundary by value.

/// Shared helpers: structural path and preferred selector for an element.
const HELPERS: &str = r#"
  function __lrEscape(s) {
    return (window.CSS && CSS.escape) ? CSS.escape(s) : String(s).replace(/[^a-zA-Z0-9_-]/g, '\\$&');
  }
  function __lrNth(el) {
    var n = 1, s = el.previousElementSibling;
    while (s) { if (s.tagName === el.tagName) n++; s = s.previousElementSibling; }
    return n;
  }
  function __lrPath(el) {
    var parts = [];
    while (el && el.nodeType === 1) {
      var tag = el.tagName.toLowerCase();
      if (tag === 'html') { parts.unshift('html'); break; }
      parts.unshift(tag + ':nth-of-type(' + __lrNth(el) + ')');
      el = el.parentElement;
    }
    return parts.join(' > ');
  }
  function __lrSelector(el) {
    if (el.id) {
      var sel = '#' + __lrEscape(el.id);
      try { if (document.querySelectorAll(sel).length === 1) return sel; } catch (e) {}
    }
    return __lrPath(el);
  }
"#;

/// Error-capture hook injected at the top of `<head>` before load.
pub const ERROR_HOOK: &str = r#"<script data-lr-hook="errors">
window.__lrErrors = [];
window.__lrWarnings = [];
window.addEventListener('error', function (e) {
  window.__lrErrors.push({ message: String(e.message || e), source: String(e.filename || ''), line: e.lineno || 0 });
});
window.addEventListener('unhandledrejection', function (e) {
  window.__lrErrors.push({ message: 'Unhandled rejection: ' + String(e.reason), source: '', line: 0 });
});
(function () {
  var original = console.error;
  console.error = function () {
    window.__lrWarnings.push(Array.prototype.join.call(arguments, ' '));
    return original.apply(console, arguments);
  };
})();
</script>"#;

pub const DOCUMENT_STATE: &str = r#"
(function () {
  return JSON.stringify({
    readyState: document.readyState,
    hasBody: !!document.body,
    bodyElementCount: document.body ? document.body.getElementsByTagName('*').length : 0,
    errors: window.__lrErrors || [],
    consoleWarnings: window.__lrWarnings || []
  });
})()
"#;

pub const READY_STATE: &str = "document.readyState";

/// Geometry walk over `universe` (a CSS selector).
pub fn geometry_script(universe: &str) -> String {
    let universe_literal = serde_json::to_string(universe).unwrap_or_else(|_| "\"*\"".to_string());
    format!(
        r#"
(function (universe) {{
  {helpers}
  var skip = {{ head: 1, script: 1, style: 1, meta: 1, link: 1, title: 1, noscript: 1, template: 1, base: 1 }};
  var all = document.querySelectorAll('*');
  var order = new Map();
  for (var i = 0; i < all.length; i++) order.set(all[i], i);
  var vw = window.innerWidth, vh = window.innerHeight;
  var targets = universe === '*' ? all : document.querySelectorAll(universe);
  var out = [];
  for (var j = 0; j < targets.length; j++) {{
    var el = targets[j];
    var tag = el.tagName.toLowerCase();
    if (skip[tag]) continue;
    var inHead = false;
    for (var p = el.parentElement; p; p = p.parentElement) {{ if (p.tagName === 'HEAD') {{ inHead = true; break; }} }}
    if (inHead) continue;
    var cs = getComputedStyle(el);
    var r = el.getBoundingClientRect();
    var attrs = {{}};
    for (var k = 0; k < el.attributes.length; k++) attrs[el.attributes[k].name] = el.attributes[k].value;
    if (typeof el.onclick === 'function' && !attrs.onclick) attrs.onclick = '[handler]';
    var opacity = parseFloat(cs.opacity);
    var vis = 'visible';
    if (cs.display === 'none' || cs.visibility === 'hidden' || cs.visibility === 'collapse' || opacity < 0.05 || r.width <= 0 || r.height <= 0) {{
      vis = 'invisible';
    }} else if (r.left < 0 || r.top < 0 || r.right > vw || r.bottom > vh) {{
      vis = 'partial';
    }}
    var text = (el.innerText || '').trim();
    out.push({{
      index: order.get(el),
      parent: el.parentElement && order.has(el.parentElement) ? order.get(el.parentElement) : null,
      tag: tag,
      id: el.id || null,
      classes: Array.prototype.slice.call(el.classList),
      x: r.left, y: r.top, w: r.width, h: r.height,
      zIndex: cs.zIndex,
      pointerEvents: cs.pointerEvents,
      visibility: vis,
      attributes: attrs,
      style: {{
        opacity: isNaN(opacity) ? 1 : opacity,
        display: cs.display,
        visibility: cs.visibility,
        position: cs.position,
        transform: cs.transform,
        transformStyle: cs.transformStyle,
        backfaceVisibility: cs.backfaceVisibility || cs.webkitBackfaceVisibility || 'visible',
        perspective: cs.perspective,
        cursor: cs.cursor
      }},
      path: __lrPath(el),
      selector: __lrSelector(el),
      nthOfType: __lrNth(el),
      text: text ? text.slice(0, 80) : null
    }});
  }}
  return JSON.stringify(out);
}})({universe})
"#,
        helpers = HELPERS,
        universe = universe_literal
    )
}

/// Topmost element at a viewport point.
pub fn hit_test_script(x: f64, y: f64) -> String {
    format!(
        r#"
(function (x, y) {{
  {helpers}
  var el = document.elementFromPoint(x, y);
  if (!el) return JSON.stringify(null);
  return JSON.stringify({{ path: __lrPath(el), selector: __lrSelector(el) }});
}})({x}, {y})
"#,
        helpers = HELPERS,
        x = x,
        y = y
    )
}
