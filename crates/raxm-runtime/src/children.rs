use crate::dispatcher::{ActionDispatcher, RenderRequest};
use crate::html::escape_attribute;
use indexmap::IndexMap;
use raxm_component::ChildRenderer;
use raxm_protocol::{DataMap, Fingerprint, ID_ATTRIBUTE, RaxmError, RaxmResult};
use tracing::debug;

/// Child renderer used while a parent renders.
///
/// Keys present in the parent's previous memo are not rendered again: the
/// child owns its subtree client-side and only a placeholder carrying its
/// id is emitted. Keys not rendered this round drop out of the memo.
pub(crate) struct ChildScope<'a> {
    dispatcher: &'a ActionDispatcher,
    request: RenderRequest,
    previous: &'a IndexMap<String, Fingerprint>,
    rendered: IndexMap<String, Fingerprint>,
}

impl<'a> ChildScope<'a> {
    pub(crate) fn new(
        dispatcher: &'a ActionDispatcher,
        parent: &Fingerprint,
        previous: &'a IndexMap<String, Fingerprint>,
    ) -> Self {
        Self {
            dispatcher,
            request: RenderRequest::from(parent),
            previous,
            rendered: IndexMap::new(),
        }
    }

    pub(crate) fn into_rendered(self) -> IndexMap<String, Fingerprint> {
        self.rendered
    }
}

impl ChildRenderer for ChildScope<'_> {
    fn child(&mut self, key: &str, name: &str, params: &DataMap) -> RaxmResult<String> {
        if self.rendered.contains_key(key) {
            return Err(RaxmError::component(format!(
                "child key {key} rendered twice"
            )));
        }

        if let Some(fingerprint) = self.previous.get(key)
            && fingerprint.name == name
        {
            debug!(key, child_id = %fingerprint.id, "child kept, placeholder rendered");
            self.rendered.insert(key.to_owned(), fingerprint.clone());
            return Ok(placeholder(fingerprint));
        }

        let mounted = self.dispatcher.mount(name, params, &self.request)?;
        debug!(key, child_id = %mounted.fingerprint().id, "child mounted");
        self.rendered
            .insert(key.to_owned(), mounted.fingerprint().clone());
        Ok(mounted.html)
    }
}

fn placeholder(fingerprint: &Fingerprint) -> String {
    format!(
        "<div {ID_ATTRIBUTE}=\"{}\"></div>",
        escape_attribute(fingerprint.id.as_str())
    )
}
