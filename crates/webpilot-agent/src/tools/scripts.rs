//! Page-context scripts backing the structured extraction tools.
//!
//! Each script evaluates to a JSON-serializable value. Extraction happens
//! in one round-trip; no per-element driver calls.

pub const EXTRACT_LINKS: &str = r#"
Array.from(document.querySelectorAll('a')).map(a => ({
  text: (a.innerText || a.textContent || '').trim(),
  href: a.getAttribute('href') || '',
}))
"#;

pub const EXTRACT_FORMS: &str = r#"
Array.from(document.querySelectorAll('form')).map((form, index) => ({
  index,
  action: form.getAttribute('action') || '',
  method: (form.getAttribute('method') || 'get').toLowerCase(),
  fields: Array.from(form.elements).map(el => ({
    tag: el.tagName.toLowerCase(),
    type: el.type || '',
    name: el.name || '',
    id: el.id || '',
    required: !!el.required,
  })),
}))
"#;

pub const EXTRACT_INPUTS: &str = r#"
Array.from(document.querySelectorAll('input, textarea, select')).map(el => ({
  tag: el.tagName.toLowerCase(),
  type: el.type || '',
  name: el.name || '',
  id: el.id || '',
  placeholder: el.placeholder || '',
  value: el.value || '',
  disabled: !!el.disabled,
}))
"#;

pub const EXTRACT_TABLES: &str = r#"
Array.from(document.querySelectorAll('table')).map((table, index) => ({
  index,
  headers: Array.from(table.querySelectorAll('th')).map(th => th.innerText.trim()),
  rows: Array.from(table.querySelectorAll('tr')).map(tr =>
    Array.from(tr.querySelectorAll('td')).map(td => td.innerText.trim())
  ).filter(row => row.length > 0),
}))
"#;

pub const DETECT_CONTACT_FORM: &str = r#"
(() => {
  const forms = Array.from(document.querySelectorAll('form'));
  for (const form of forms) {
    const fields = Array.from(form.elements);
    const hasEmail = fields.some(el => el.type === 'email' || /mail/i.test(el.name || ''));
    const hasMessage = fields.some(el =>
      el.tagName === 'TEXTAREA' || /message|comment|inquiry/i.test(el.name || ''));
    if (hasEmail && hasMessage) {
      return {
        found: true,
        action: form.getAttribute('action') || '',
        fields: fields.map(el => ({ name: el.name || '', type: el.type || '' })),
      };
    }
  }
  return { found: false };
})()
"#;

pub const INSPECT_HTML: &str = r#"
({
  url: location.href,
  title: document.title,
  links: document.querySelectorAll('a').length,
  forms: document.querySelectorAll('form').length,
  inputs: document.querySelectorAll('input, textarea, select').length,
  images: document.querySelectorAll('img').length,
  text_length: (document.body ? document.body.innerText.length : 0),
})
"#;
