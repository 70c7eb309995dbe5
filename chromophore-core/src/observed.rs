//! The observable wrapper and the factory that produces it.
//!
//! Every composite node of a tree is reached through an [`Observed`] handle.
//! Handles read through to the arena, wrap composite results on the way out,
//! adopt composite values on the way in, and persist the whole root after
//! each mutation that succeeds.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, trace};

use crate::arena::{Arena, Attributes, Member, NodeId, Pin, View};
use crate::callable::Callable;
use crate::error::{Error, Result};
use crate::key::{Key, parse_path};
use crate::value::{Kind, Value};

type SaveHook = Box<dyn FnMut(&Value) -> Result<()> + Send>;

struct State {
    arena: Arena,
    root: NodeId,
    on_mutate: SaveHook,
    mutations: u64,
    closed: bool,
}

impl State {
    /// Releases detached nodes, then hands a snapshot of the entire root to
    /// the save hook.
    fn persist(&mut self) -> Result<()> {
        let released = self.arena.collect(self.root);
        if released > 0 {
            trace!(released, "released detached nodes");
        }
        let snapshot = self.arena.snapshot(self.root, View::Persisted)?;
        (self.on_mutate)(&snapshot)?;
        self.mutations += 1;
        debug!(mutations = self.mutations, "persisted root");
        Ok(())
    }

    /// Turns an incoming entry into something a property can hold.
    fn member_for(&mut self, ctx: &Context, entry: Entry) -> Result<Member> {
        match entry {
            Entry::Node(node) if node.ctx.same(ctx) => Ok(Member::Node(node.id)),
            Entry::Node(_) => Err(Error::ForeignNode),
            Entry::Value(value) => Ok(self.arena.adopt(value)),
        }
    }

    fn node(&mut self, ctx: &Context, id: NodeId) -> Observed {
        Observed {
            id,
            _pin: self.arena.pin(id),
            ctx: ctx.clone(),
        }
    }

    fn entry(&mut self, ctx: &Context, member: Member) -> Entry {
        match member {
            Member::Leaf(value) => Entry::Value(value),
            Member::Node(id) => Entry::Node(self.node(ctx, id)),
        }
    }
}

/// Shared state of one tree: the arena, the root and the save hook.
///
/// Cloning a context is cheap and yields a handle to the same tree. All
/// operations on a tree are serialized by one lock, and each save runs
/// under it.
#[derive(Clone)]
pub struct Context {
    shared: Arc<Mutex<State>>,
}

impl Context {
    /// Adopts `root` as the root of a new tree and returns its wrapper.
    ///
    /// `on_mutate` receives a snapshot of the whole root after every
    /// successful mutation, wherever in the tree it happened.
    pub fn observe<F>(root: Value, on_mutate: F) -> Result<Observed>
    where
        F: FnMut(&Value) -> Result<()> + Send + 'static,
    {
        let mut arena = Arena::new();
        let root = match arena.adopt(root) {
            Member::Node(id) => id,
            Member::Leaf(leaf) => {
                return Err(Error::InvalidNodeKind {
                    expected: "mapping or sequence",
                    found: leaf.kind(),
                });
            }
        };
        let pin = arena.pin(root);
        let ctx = Context {
            shared: Arc::new(Mutex::new(State {
                arena,
                root,
                on_mutate: Box::new(on_mutate),
                mutations: 0,
                closed: false,
            })),
        };
        Ok(Observed {
            id: root,
            _pin: pin,
            ctx,
        })
    }

    /// Wraps a value for this tree.
    ///
    /// Leaves come back unchanged, and so does a wrapper that already belongs
    /// to this tree. Mappings and sequences are adopted and come back as
    /// wrappers over detached nodes.
    pub fn wrap(&self, value: impl Into<Entry>) -> Result<Entry> {
        match value.into() {
            Entry::Node(node) if node.ctx.same(self) => Ok(Entry::Node(node)),
            Entry::Node(_) => Err(Error::ForeignNode),
            Entry::Value(value) if value.is_composite() => {
                let mut state = self.state()?;
                let member = state.arena.adopt(value);
                Ok(state.entry(self, member))
            }
            Entry::Value(leaf) => Ok(Entry::Value(leaf)),
        }
    }

    /// Returns the wrapper of the root node.
    pub fn root(&self) -> Result<Observed> {
        let mut state = self.state()?;
        let root = state.root;
        Ok(state.node(self, root))
    }

    /// Number of mutations persisted so far.
    pub fn mutations(&self) -> u64 {
        self.lock().mutations
    }

    /// Number of composite nodes the tree holds: those reachable from the
    /// root, plus detached ones a wrapper still refers to. Nodes detached
    /// since the last mutation are released when the next one persists.
    pub fn node_count(&self) -> usize {
        self.lock().arena.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Persists the current root without a mutation.
    pub(crate) fn flush(&self) -> Result<()> {
        let mut state = self.state()?;
        let snapshot = state.arena.snapshot(state.root, View::Persisted)?;
        (state.on_mutate)(&snapshot)?;
        debug!("flushed root");
        Ok(())
    }

    /// Flushes, then refuses every further operation.
    pub(crate) fn close(&self) -> Result<()> {
        self.flush()?;
        self.lock().closed = true;
        debug!("tree closed");
        Ok(())
    }

    fn same(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> Result<MutexGuard<'_, State>> {
        let state = self.lock();
        if state.closed {
            return Err(Error::Closed);
        }
        Ok(state)
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("shared", &Arc::as_ptr(&self.shared))
            .finish()
    }
}

/// What a read returns: a leaf value, or a wrapper over a composite node.
///
/// As an argument to a write it may also carry a detached composite value,
/// which is adopted into the tree first.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Value(Value),
    Node(Observed),
}

impl Entry {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Entry::Value(v) => Some(v),
            Entry::Node(_) => None,
        }
    }

    pub fn as_node(&self) -> Option<&Observed> {
        match self {
            Entry::Node(n) => Some(n),
            Entry::Value(_) => None,
        }
    }

    /// Returns the wrapper, or `InvalidNodeKind` for a leaf.
    pub fn into_node(self) -> Result<Observed> {
        match self {
            Entry::Node(n) => Ok(n),
            Entry::Value(v) => Err(Error::InvalidNodeKind {
                expected: "mapping or sequence",
                found: v.kind(),
            }),
        }
    }

    pub fn is_node(&self) -> bool {
        matches!(self, Entry::Node(_))
    }

    /// Detached copy of the entry; wrappers are snapshotted in full.
    pub fn to_value(&self) -> Result<Value> {
        match self {
            Entry::Value(v) => Ok(v.clone()),
            Entry::Node(n) => n.to_value(),
        }
    }
}

macro_rules! entry_from_value {
    ($($t:ty),* $(,)?) => {
        $(
            impl From<$t> for Entry {
                fn from(v: $t) -> Self {
                    Entry::Value(Value::from(v))
                }
            }
        )*
    };
}

entry_from_value!(
    Value,
    bool,
    &str,
    String,
    i32,
    i64,
    u64,
    f64,
    Callable,
    serde_json::Value
);

impl From<Observed> for Entry {
    fn from(node: Observed) -> Self {
        Entry::Node(node)
    }
}

impl From<&Observed> for Entry {
    fn from(node: &Observed) -> Self {
        Entry::Node(node.clone())
    }
}

/// An own property as seen through a wrapper.
#[derive(Debug, Clone, PartialEq)]
pub struct Descriptor {
    pub value: Entry,
    pub attributes: Attributes,
}

/// A wrapper over one composite node of a tree.
///
/// The wrapper does not own the node; it names an arena slot and keeps that
/// slot allocated while it lives, even after the node is detached from the
/// root. Two wrappers are equal when they name the same slot of the same
/// tree, so reading the same child twice yields equal wrappers.
#[derive(Clone)]
pub struct Observed {
    id: NodeId,
    _pin: Arc<Pin>,
    ctx: Context,
}

impl Observed {
    /// The tree this wrapper belongs to.
    pub fn context(&self) -> &Context {
        &self.ctx
    }

    /// Mapping or sequence.
    pub fn kind(&self) -> Result<Kind> {
        Ok(self.ctx.state()?.arena.kind(self.id))
    }

    /// Reads a property, following the prototype chain.
    pub fn get(&self, key: impl Into<Key>) -> Result<Option<Entry>> {
        let key = key.into();
        let mut state = self.ctx.state()?;
        trace!(node = %self.id, key = %key, "get");
        let member = state.arena.lookup(self.id, &key).map(|p| p.member.clone());
        Ok(member.map(|m| state.entry(&self.ctx, m)))
    }

    /// Writes a property and persists the root.
    ///
    /// A composite value is adopted before the write, so reading it back yields
    /// a wrapper.
    pub fn set(&self, key: impl Into<Key>, value: impl Into<Entry>) -> Result<()> {
        let key = key.into();
        let mut state = self.ctx.state()?;
        trace!(node = %self.id, key = %key, "set");
        let member = state.member_for(&self.ctx, value.into())?;
        state.arena.write(self.id, &key, member)?;
        state.persist()
    }

    /// Deletes an own property and persists the root.
    ///
    /// Returns false, without persisting, when there was no such property.
    /// Deleting a sequence element leaves a hole.
    pub fn delete(&self, key: impl Into<Key>) -> Result<bool> {
        let key = key.into();
        let mut state = self.ctx.state()?;
        trace!(node = %self.id, key = %key, "delete");
        if !state.arena.remove(self.id, &key)? {
            return Ok(false);
        }
        state.persist()?;
        Ok(true)
    }

    /// Whether the key resolves, on the node or its prototype chain.
    pub fn has(&self, key: impl Into<Key>) -> Result<bool> {
        let key = key.into();
        let state = self.ctx.state()?;
        trace!(node = %self.id, key = %key, "has");
        Ok(state.arena.lookup(self.id, &key).is_some())
    }

    /// Own keys, hidden ones included, in insertion (or index) order.
    pub fn keys(&self) -> Result<Vec<Key>> {
        let state = self.ctx.state()?;
        trace!(node = %self.id, "keys");
        Ok(state.arena.own_keys(self.id))
    }

    /// Number of own properties of a mapping, or the length of a sequence.
    pub fn len(&self) -> Result<usize> {
        Ok(self.ctx.state()?.arena.len_of(self.id))
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Describes an own property. The value is wrapped if composite.
    pub fn descriptor(&self, key: impl Into<Key>) -> Result<Option<Descriptor>> {
        let key = key.into();
        let mut state = self.ctx.state()?;
        trace!(node = %self.id, key = %key, "descriptor");
        let property = state.arena.own(self.id, &key).cloned();
        Ok(property.map(|p| Descriptor {
            value: state.entry(&self.ctx, p.member),
            attributes: p.attrs,
        }))
    }

    /// Creates or reconfigures an own property and persists the root.
    pub fn define(
        &self,
        key: impl Into<Key>,
        value: impl Into<Entry>,
        attributes: Attributes,
    ) -> Result<()> {
        let key = key.into();
        let mut state = self.ctx.state()?;
        trace!(node = %self.id, key = %key, ?attributes, "define");
        let member = state.member_for(&self.ctx, value.into())?;
        state.arena.define(self.id, &key, member, attributes)?;
        state.persist()
    }

    /// The node reads fall back to when a key is not an own property.
    pub fn prototype(&self) -> Result<Option<Observed>> {
        let mut state = self.ctx.state()?;
        trace!(node = %self.id, "prototype");
        let proto = state.arena.slot(self.id).proto;
        Ok(proto.map(|id| state.node(&self.ctx, id)))
    }

    /// Links (or unlinks) a prototype and persists the root.
    pub fn set_prototype(&self, proto: Option<&Observed>) -> Result<()> {
        let proto = match proto {
            Some(p) if !p.ctx.same(&self.ctx) => return Err(Error::ForeignNode),
            Some(p) => Some(p.id),
            None => None,
        };
        let mut state = self.ctx.state()?;
        trace!(node = %self.id, ?proto, "set_prototype");
        state.arena.set_proto(self.id, proto)?;
        state.persist()
    }

    pub fn is_extensible(&self) -> Result<bool> {
        let state = self.ctx.state()?;
        trace!(node = %self.id, "is_extensible");
        Ok(state.arena.slot(self.id).extensible)
    }

    /// Allows or forbids new properties and persists the root. Once forbidden,
    /// extension cannot be allowed again.
    pub fn set_extensible(&self, extensible: bool) -> Result<()> {
        let mut state = self.ctx.state()?;
        trace!(node = %self.id, extensible, "set_extensible");
        state.arena.set_extensible(self.id, extensible)?;
        state.persist()
    }

    pub fn prevent_extensions(&self) -> Result<()> {
        self.set_extensible(false)
    }

    /// Forbids extension and makes every own property read-only and
    /// non-configurable, as one persisted mutation. Shallow.
    pub fn freeze(&self) -> Result<()> {
        let mut state = self.ctx.state()?;
        trace!(node = %self.id, "freeze");
        state.arena.freeze(self.id);
        state.persist()
    }

    pub fn is_frozen(&self) -> Result<bool> {
        Ok(self.ctx.state()?.arena.is_frozen(self.id))
    }

    /// Appends to a sequence and persists the root. Returns the new index.
    pub fn push(&self, value: impl Into<Entry>) -> Result<usize> {
        let mut state = self.ctx.state()?;
        trace!(node = %self.id, "push");
        let member = state.member_for(&self.ctx, value.into())?;
        let index = state.arena.push(self.id, member)?;
        state.persist()?;
        Ok(index)
    }

    /// Removes the last element of a sequence and persists the root.
    ///
    /// An empty sequence is left alone and nothing is persisted. A trailing
    /// hole is removed and reads as `None`. A sequence that no longer accepts
    /// extensions refuses to shrink.
    pub fn pop(&self) -> Result<Option<Entry>> {
        let mut state = self.ctx.state()?;
        trace!(node = %self.id, "pop");
        let Some(popped) = state.arena.pop(self.id)? else {
            return Ok(None);
        };
        // Wrap before persisting so the popped node survives collection.
        let popped = popped.map(|m| state.entry(&self.ctx, m));
        state.persist()?;
        Ok(popped)
    }

    /// Calls the callable stored at `key`, with this wrapper as `this`.
    ///
    /// The call itself is not a mutation; whatever the callable writes through
    /// `this` is persisted write by write. The tree lock is released for the
    /// duration of the call.
    pub fn invoke(&self, key: impl Into<Key>, args: &[Value]) -> Result<Entry> {
        let key = key.into();
        let callable = self.callable(&key)?;
        trace!(node = %self.id, key = %key, callable = callable.name(), "invoke");
        callable.call(Some(self), args)
    }

    /// Constructs an instance with the callable stored at `key` and returns it
    /// wrapped. The instance is not attached to the tree, but writes through
    /// it still persist the root.
    pub fn construct(&self, key: impl Into<Key>, args: &[Value]) -> Result<Entry> {
        let key = key.into();
        let callable = self.callable(&key)?;
        trace!(node = %self.id, key = %key, callable = callable.name(), "construct");
        let instance = callable.construct(args)?;
        self.ctx.wrap(instance)
    }

    fn callable(&self, key: &Key) -> Result<Callable> {
        let state = self.ctx.state()?;
        match state.arena.lookup(self.id, key).map(|p| &p.member) {
            Some(Member::Leaf(Value::Callable(c))) => Ok(c.clone()),
            Some(other) => Err(Error::InvalidNodeKind {
                expected: "callable",
                found: state.arena.member_kind(other),
            }),
            None => Err(Error::InvalidNodeKind {
                expected: "callable",
                found: Kind::Null,
            }),
        }
    }

    /// Follows a sequence of keys from this node.
    ///
    /// Returns `None` if any step is missing, and `InvalidNodeKind` if a step
    /// lands on a leaf before the path ends. An empty path yields this node.
    pub fn at<I>(&self, path: I) -> Result<Option<Entry>>
    where
        I: IntoIterator,
        I::Item: Into<Key>,
    {
        let mut current = Entry::Node(self.clone());
        for key in path {
            let node = current.into_node()?;
            match node.get(key)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Like [`Observed::at`], with a textual path such as `userList[0].name`.
    pub fn at_path(&self, path: &str) -> Result<Option<Entry>> {
        self.at(parse_path(path)?)
    }

    /// Detached copy of the subtree, callables and hidden properties included.
    pub fn to_value(&self) -> Result<Value> {
        self.ctx.state()?.arena.snapshot(self.id, View::Full)
    }

    /// Whether this wrapper is the root of its tree.
    pub fn is_root(&self) -> Result<bool> {
        Ok(self.ctx.state()?.root == self.id)
    }
}

impl PartialEq for Observed {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.ctx.same(&other.ctx)
    }
}

impl fmt::Debug for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Observed({})", self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Rejection;
    use serde_json::json;
    use std::sync::Arc;

    type Saves = Arc<Mutex<Vec<Value>>>;

    fn observe(json: serde_json::Value) -> (Observed, Saves) {
        let saves: Saves = Arc::default();
        let sink = saves.clone();
        let root = Context::observe(Value::from(json), move |root| {
            sink.lock().unwrap().push(root.clone());
            Ok(())
        })
        .unwrap();
        (root, saves)
    }

    fn node(entry: Option<Entry>) -> Observed {
        entry.unwrap().into_node().unwrap()
    }

    #[test]
    fn leaves_pass_through_wrap() {
        let (root, _) = observe(json!({}));
        let ctx = root.context();
        assert_eq!(ctx.wrap("x").unwrap(), Entry::Value(Value::from("x")));
        assert_eq!(ctx.wrap(Value::Null).unwrap(), Entry::Value(Value::Null));
        let pattern = Value::pattern("^x$");
        assert_eq!(ctx.wrap(pattern.clone()).unwrap(), Entry::Value(pattern));
    }

    #[test]
    fn wrapping_is_idempotent() {
        let (root, _) = observe(json!({"a": {}}));
        let a = node(root.get("a").unwrap());
        let wrapped = root.context().wrap(&a).unwrap();
        assert_eq!(wrapped, Entry::Node(a.clone()));
        let before = root.context().node_count();
        root.context().wrap(wrapped).unwrap();
        assert_eq!(root.context().node_count(), before);
    }

    #[test]
    fn wrapping_composites_adopts_them() {
        let (root, saves) = observe(json!({}));
        let entry = root.context().wrap(json!({"x": [1]})).unwrap();
        let detached = entry.into_node().unwrap();
        assert!(!detached.is_root().unwrap());
        assert_eq!(detached.to_value().unwrap().to_json(), json!({"x": [1]}));
        assert!(saves.lock().unwrap().is_empty());
    }

    #[test]
    fn root_must_be_composite() {
        let err = Context::observe(Value::from(3), |_| Ok(())).unwrap_err();
        assert!(matches!(err, Error::InvalidNodeKind { found: Kind::Number, .. }));
    }

    #[test]
    fn reads_wrap_composites() {
        let (root, saves) = observe(json!({"name": "n", "tags": ["a"], "settings": {"x": 1}}));
        assert_eq!(root.get("name").unwrap(), Some(Entry::from("n")));
        assert!(root.get("tags").unwrap().unwrap().is_node());
        assert!(root.get("settings").unwrap().unwrap().is_node());
        assert_eq!(root.get("missing").unwrap(), None);
        assert!(saves.lock().unwrap().is_empty());
    }

    #[test]
    fn repeated_reads_yield_equal_wrappers() {
        let (root, _) = observe(json!({"child": {}}));
        assert_eq!(root.get("child").unwrap(), root.get("child").unwrap());
    }

    #[test]
    fn nested_write_persists_whole_root_once() {
        let (root, saves) = observe(json!({"a": {"b": {"c": 1}}, "z": true}));
        let b = node(root.at(["a", "b"]).unwrap());
        b.set("c", 2).unwrap();

        let saves = saves.lock().unwrap();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].to_json(), json!({"a": {"b": {"c": 2}}, "z": true}));
    }

    #[test]
    fn written_composites_read_back_wrapped() {
        let (root, _) = observe(json!({}));
        root.set("user", json!({"id": 7})).unwrap();
        let user = node(root.get("user").unwrap());
        assert_eq!(user.get("id").unwrap(), Some(Entry::from(7)));
    }

    #[test]
    fn storing_a_wrapper_shares_the_node() {
        let (root, saves) = observe(json!({"a": {"x": 1}}));
        let a = node(root.get("a").unwrap());
        root.set("b", &a).unwrap();
        assert_eq!(node(root.get("b").unwrap()), a);

        a.set("x", 2).unwrap();
        let last = saves.lock().unwrap().last().cloned().unwrap();
        assert_eq!(last.to_json(), json!({"a": {"x": 2}, "b": {"x": 2}}));
    }

    #[test]
    fn foreign_wrappers_are_refused() {
        let (left, _) = observe(json!({}));
        let (right, saves) = observe(json!({}));
        let err = right.set("x", &left).unwrap_err();
        assert!(matches!(err, Error::ForeignNode));
        assert!(matches!(right.context().wrap(&left), Err(Error::ForeignNode)));
        assert!(saves.lock().unwrap().is_empty());
    }

    #[test]
    fn delete_missing_key_does_not_persist() {
        let (root, saves) = observe(json!({"a": 1}));
        assert!(!root.delete("b").unwrap());
        assert!(saves.lock().unwrap().is_empty());
        assert!(root.delete("a").unwrap());
        assert_eq!(saves.lock().unwrap().len(), 1);
        assert!(!root.has("a").unwrap());
    }

    #[test]
    fn delete_sequence_element_leaves_hole() {
        let (root, saves) = observe(json!({"tags": ["admin", "developer"]}));
        let tags = node(root.get("tags").unwrap());
        assert!(tags.delete(1usize).unwrap());
        assert_eq!(tags.len().unwrap(), 2);
        assert_eq!(tags.get(1usize).unwrap(), None);
        assert_eq!(saves.lock().unwrap()[0].to_json(), json!({"tags": ["admin", null]}));
    }

    #[test]
    fn prevented_extension_rejects_new_keys_without_persisting() {
        let (root, saves) = observe(json!({"a": 1}));
        root.prevent_extensions().unwrap();
        assert_eq!(saves.lock().unwrap().len(), 1);
        assert!(!root.is_extensible().unwrap());

        let err = root.set("b", 2).unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::NotExtensible));
        assert_eq!(saves.lock().unwrap().len(), 1);
        assert!(!root.has("b").unwrap());

        // Existing properties stay writable.
        root.set("a", 3).unwrap();
        assert_eq!(saves.lock().unwrap().len(), 2);

        let err = root.set_extensible(true).unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::Irreversible));
    }

    #[test]
    fn freeze_is_one_mutation() {
        let (root, saves) = observe(json!({"a": 1}));
        root.freeze().unwrap();
        assert!(root.is_frozen().unwrap());
        assert_eq!(saves.lock().unwrap().len(), 1);
        assert!(root.set("a", 2).is_err());
        assert!(root.delete("a").is_err());
        assert_eq!(saves.lock().unwrap().len(), 1);
    }

    #[test]
    fn descriptor_wraps_composite_values() {
        let (root, _) = observe(json!({"name": "n", "settings": {}}));
        let d = root.descriptor("settings").unwrap().unwrap();
        assert!(d.value.is_node());
        assert_eq!(d.attributes, Attributes::default());
        let d = root.descriptor("name").unwrap().unwrap();
        assert_eq!(d.value, Entry::from("n"));
        assert!(root.descriptor("missing").unwrap().is_none());
    }

    #[test]
    fn define_hidden_property() {
        let (root, saves) = observe(json!({"a": 1}));
        root.define("token", "secret", Attributes::hidden()).unwrap();
        assert_eq!(root.get("token").unwrap(), Some(Entry::from("secret")));
        assert_eq!(root.keys().unwrap(), vec![Key::from("a"), Key::from("token")]);
        assert_eq!(saves.lock().unwrap()[0].to_json(), json!({"a": 1}));
    }

    #[test]
    fn prototype_links() {
        let (root, saves) = observe(json!({"base": {"greeting": "hi"}, "derived": {}}));
        let base = node(root.get("base").unwrap());
        let derived = node(root.get("derived").unwrap());

        derived.set_prototype(Some(&base)).unwrap();
        assert_eq!(saves.lock().unwrap().len(), 1);
        assert_eq!(derived.prototype().unwrap(), Some(base.clone()));
        assert_eq!(derived.get("greeting").unwrap(), Some(Entry::from("hi")));
        assert!(derived.has("greeting").unwrap());
        assert!(derived.keys().unwrap().is_empty());

        let err = base.set_prototype(Some(&derived)).unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::PrototypeCycle));
        assert_eq!(saves.lock().unwrap().len(), 1);

        // Prototype links are not part of the persisted form.
        assert_eq!(
            saves.lock().unwrap()[0].to_json(),
            json!({"base": {"greeting": "hi"}, "derived": {}})
        );
    }

    #[test]
    fn invoke_passes_wrapper_as_this() {
        let (root, saves) = observe(json!({"count": 0}));
        let bump = Callable::from_fn("bump", |this, args| {
            let this = this.ok_or_else(|| Error::Invocation("no receiver".into()))?;
            let step = args.first().and_then(Value::as_i64).unwrap_or(1);
            let current = this
                .get("count")?
                .and_then(|e| e.as_value().and_then(Value::as_i64))
                .unwrap_or(0);
            this.set("count", current + step)?;
            Ok(Entry::from(current + step))
        });
        root.set("bump", bump).unwrap();
        assert_eq!(saves.lock().unwrap().len(), 1);

        let result = root.invoke("bump", &[Value::from(5)]).unwrap();
        assert_eq!(result, Entry::from(5i64));
        // Only the write inside the call persisted.
        let saves = saves.lock().unwrap();
        assert_eq!(saves.len(), 2);
        assert_eq!(saves[1].to_json(), json!({"count": 5}));
    }

    #[test]
    fn invoke_without_side_effects_does_not_persist() {
        let (root, saves) = observe(json!({}));
        root.set(
            "add",
            Callable::from_fn("add", |_, args| {
                Ok(Entry::from(args.iter().filter_map(Value::as_f64).sum::<f64>()))
            }),
        )
        .unwrap();
        let result = root.invoke("add", &[Value::from(10), Value::from(20)]).unwrap();
        assert_eq!(result.as_value().and_then(Value::as_f64), Some(30.0));
        assert_eq!(saves.lock().unwrap().len(), 1);
    }

    #[test]
    fn invoking_a_non_callable_fails() {
        let (root, _) = observe(json!({"name": "n", "child": {}}));
        let err = root.invoke("name", &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidNodeKind { found: Kind::String, .. }));
        let err = root.invoke("child", &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidNodeKind { found: Kind::Mapping, .. }));
        let err = root.invoke("missing", &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidNodeKind { found: Kind::Null, .. }));
    }

    #[test]
    fn construct_wraps_instance() {
        struct Pair;
        impl crate::Invoke for Pair {
            fn call(&self, _: Option<&Observed>, _: &[Value]) -> Result<Entry> {
                Err(Error::Invocation("constructor only".into()))
            }
            fn construct(&self, args: &[Value]) -> Result<Value> {
                Ok(Value::Sequence(args.to_vec()))
            }
        }

        let (root, saves) = observe(json!({}));
        root.set("Pair", Callable::new("Pair", Pair)).unwrap();
        let pair = root
            .construct("Pair", &[Value::from(1), Value::from(2)])
            .unwrap()
            .into_node()
            .unwrap();
        assert_eq!(pair.len().unwrap(), 2);

        // Detached, but writes still persist the (unchanged) root.
        pair.push(3).unwrap();
        let saves = saves.lock().unwrap();
        assert_eq!(saves.len(), 2);
        assert_eq!(saves[1].to_json(), json!({}));
    }

    #[test]
    fn push_and_pop() {
        let (root, saves) = observe(json!({"list": [{"id": 1}]}));
        let list = node(root.get("list").unwrap());
        assert_eq!(list.push(json!({"id": 2})).unwrap(), 1);
        assert!(node(list.get(1usize).unwrap()).has("id").unwrap());

        let popped = list.pop().unwrap().unwrap().into_node().unwrap();
        assert_eq!(popped.get("id").unwrap(), Some(Entry::from(2)));
        list.pop().unwrap();
        assert_eq!(list.pop().unwrap(), None);
        assert_eq!(saves.lock().unwrap().len(), 3);

        let err = root.push(1).unwrap_err();
        assert!(matches!(err, Error::InvalidNodeKind { expected: "sequence", .. }));
    }

    #[test]
    fn at_path_navigation() {
        let (root, _) = observe(json!({"userList": [{"name": "Alice"}], "name": "n"}));
        assert_eq!(root.at_path("userList[0].name").unwrap(), Some(Entry::from("Alice")));
        assert_eq!(root.at_path("userList[4].name").unwrap(), None);
        assert_eq!(root.at_path("").unwrap(), Some(Entry::Node(root.clone())));
        let err = root.at_path("name.first").unwrap_err();
        assert!(matches!(err, Error::InvalidNodeKind { found: Kind::String, .. }));
    }

    #[test]
    fn cyclic_write_is_rejected_before_it_applies() {
        let (root, saves) = observe(json!({"child": {}, "list": [], "name": "a"}));
        let child = node(root.get("child").unwrap());
        let list = node(root.get("list").unwrap());

        let err = child.set("parent", &root).unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::Cycle));
        let err = child.define("up", &root, Attributes::hidden()).unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::Cycle));
        let err = list.push(&list).unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::Cycle));
        assert!(saves.lock().unwrap().is_empty());
        assert_eq!(child.get("parent").unwrap(), None);
        assert!(list.is_empty().unwrap());

        // The tree is still persistable afterwards.
        root.set("name", "b").unwrap();
        let saves = saves.lock().unwrap();
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].to_json(), json!({"child": {}, "list": [], "name": "b"}));
    }

    #[test]
    fn far_out_of_range_index_is_rejected() {
        let (root, saves) = observe(json!({"tags": ["admin"]}));
        let tags = node(root.get("tags").unwrap());
        for index in [usize::MAX, 100_000_000_000] {
            let err = tags.set(index, "x").unwrap_err();
            assert_eq!(err.rejection(), Some(&Rejection::IndexOutOfRange(Key::Index(index))));
        }
        let err = tags.define(usize::MAX, "x", Attributes::default()).unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::IndexOutOfRange(Key::Index(usize::MAX))));
        assert_eq!(tags.len().unwrap(), 1);
        assert!(saves.lock().unwrap().is_empty());

        tags.set(3usize, "x").unwrap();
        assert_eq!(tags.len().unwrap(), 4);
        assert_eq!(saves.lock().unwrap()[0].to_json(), json!({"tags": ["admin", null, null, "x"]}));
    }

    #[test]
    fn replaced_subtrees_are_released() {
        let (root, saves) = observe(json!({"settings": {}}));
        for i in 0..10_000 {
            root.set("settings", json!({"p": {"sound": i}})).unwrap();
        }
        // root, settings, settings.p
        assert_eq!(root.context().node_count(), 3);
        assert_eq!(saves.lock().unwrap().len(), 10_000);
        assert_eq!(root.at_path("settings.p.sound").unwrap(), Some(Entry::from(9_999)));
    }

    #[test]
    fn held_wrapper_keeps_detached_subtree() {
        let (root, _) = observe(json!({"settings": {"p": {"sound": 1}}}));
        let old = node(root.get("settings").unwrap());
        root.set("settings", json!({})).unwrap();
        assert_eq!(root.context().node_count(), 4);
        assert_eq!(old.at_path("p.sound").unwrap(), Some(Entry::from(1)));

        // Writes through the detached wrapper land in its own subtree.
        old.set("theme", "dark").unwrap();
        assert_eq!(old.get("theme").unwrap(), Some(Entry::from("dark")));
        let fresh = node(root.get("settings").unwrap());
        assert_ne!(fresh, old);
        assert!(fresh.is_empty().unwrap());

        drop(old);
        root.set("name", "n").unwrap();
        assert_eq!(root.context().node_count(), 2);
        assert_eq!(fresh.get("theme").unwrap(), None);
    }

    #[test]
    fn popped_node_stays_usable() {
        let (root, _) = observe(json!({"list": [{"id": 1}]}));
        let list = node(root.get("list").unwrap());
        let popped = node(list.pop().unwrap());
        root.set("other", json!({"id": 2})).unwrap();
        assert_eq!(popped.get("id").unwrap(), Some(Entry::from(1)));
    }

    #[test]
    fn sealed_sequence_refuses_pop() {
        let (root, saves) = observe(json!({"tags": ["a", "b"], "ids": [1]}));
        let tags = node(root.get("tags").unwrap());
        assert!(tags.delete(1usize).unwrap());
        tags.freeze().unwrap();
        let err = tags.pop().unwrap_err();
        assert_eq!(err.rejection(), Some(&Rejection::NotExtensible));
        assert_eq!(tags.len().unwrap(), 2);

        let ids = node(root.get("ids").unwrap());
        ids.prevent_extensions().unwrap();
        assert!(ids.pop().is_err());
        assert_eq!(ids.len().unwrap(), 1);

        let saves = saves.lock().unwrap();
        assert_eq!(saves.len(), 3);
        assert_eq!(saves[2].to_json(), json!({"tags": ["a", null], "ids": [1]}));
    }

    #[test]
    fn save_failure_propagates() {
        let root = Context::observe(Value::from(json!({})), |_| {
            Err(Error::Invocation("disk full".into()))
        })
        .unwrap();
        let err = root.set("a", 1).unwrap_err();
        assert!(matches!(err, Error::Invocation(msg) if msg == "disk full"));
        assert_eq!(root.context().mutations(), 0);
    }
}
