use std::fmt;
use std::sync::{Arc, Weak};

use indexmap::IndexMap;

use crate::error::{Error, Rejection, Result};
use crate::key::Key;
use crate::value::{Kind, Value};

/// Index of a composite node in the arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct NodeId(usize);

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-property flags.
///
/// Non-writable properties reject writes, non-configurable properties reject
/// deletion and redefinition, and non-enumerable properties are left out of
/// persisted snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attributes {
    pub writable: bool,
    pub enumerable: bool,
    pub configurable: bool,
}

impl Attributes {
    pub const fn read_only() -> Self {
        Attributes {
            writable: false,
            enumerable: true,
            configurable: true,
        }
    }

    pub const fn hidden() -> Self {
        Attributes {
            writable: true,
            enumerable: false,
            configurable: true,
        }
    }

    pub const fn frozen() -> Self {
        Attributes {
            writable: false,
            enumerable: true,
            configurable: false,
        }
    }
}

impl Default for Attributes {
    fn default() -> Self {
        Attributes {
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }
}

/// What a property holds: a leaf stored inline or a link to another node.
#[derive(Debug, Clone)]
pub(crate) enum Member {
    Leaf(Value),
    Node(NodeId),
}

#[derive(Debug, Clone)]
pub(crate) struct Property {
    pub member: Member,
    pub attrs: Attributes,
}

impl Property {
    fn new(member: Member) -> Self {
        Property {
            member,
            attrs: Attributes::default(),
        }
    }
}

#[derive(Debug)]
pub(crate) enum Body {
    Mapping(IndexMap<String, Property>),
    /// `None` marks a hole left by deletion.
    Sequence(Vec<Option<Property>>),
}

/// Marker shared by every wrapper over one slot. A slot whose marker is still
/// alive is never released.
#[derive(Debug)]
pub(crate) struct Pin;

/// How far past the end of a sequence a single write may reach.
const MAX_GAP: usize = 1 << 16;

#[derive(Debug)]
pub(crate) struct Slot {
    pub body: Body,
    pub extensible: bool,
    pub proto: Option<NodeId>,
    pin: Weak<Pin>,
}

impl Slot {
    fn new(body: Body) -> Self {
        Slot {
            body,
            extensible: true,
            proto: None,
            pin: Weak::new(),
        }
    }

    fn children(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.properties().filter_map(|p| match p.member {
            Member::Node(id) => Some(id),
            Member::Leaf(_) => None,
        })
    }

    fn properties(&self) -> Box<dyn Iterator<Item = &Property> + '_> {
        match &self.body {
            Body::Mapping(map) => Box::new(map.values()),
            Body::Sequence(items) => Box::new(items.iter().flatten()),
        }
    }

    fn properties_mut(&mut self) -> Box<dyn Iterator<Item = &mut Property> + '_> {
        match &mut self.body {
            Body::Mapping(map) => Box::new(map.values_mut()),
            Body::Sequence(items) => Box::new(items.iter_mut().flatten()),
        }
    }

    fn own(&self, key: &Key) -> Option<&Property> {
        match &self.body {
            Body::Mapping(map) => map.get(&key.to_name()),
            Body::Sequence(items) => key.as_index().and_then(|i| items.get(i)?.as_ref()),
        }
    }

    fn own_mut(&mut self, key: &Key) -> Option<&mut Property> {
        match &mut self.body {
            Body::Mapping(map) => map.get_mut(&key.to_name()),
            Body::Sequence(items) => key.as_index().and_then(|i| items.get_mut(i)?.as_mut()),
        }
    }

    /// Adds a property that does not exist yet.
    fn insert_new(&mut self, key: &Key, property: Property) -> Result<()> {
        if !self.extensible {
            return Err(Rejection::NotExtensible.into());
        }
        match &mut self.body {
            Body::Mapping(map) => {
                map.insert(key.to_name(), property);
            }
            Body::Sequence(items) => {
                let index = key
                    .as_index()
                    .ok_or_else(|| Rejection::NotAnIndex(key.clone()))?;
                if index.saturating_sub(items.len()) > MAX_GAP {
                    return Err(Rejection::IndexOutOfRange(key.clone()).into());
                }
                if index >= items.len() {
                    items.resize_with(index + 1, || None);
                }
                items[index] = Some(property);
            }
        }
        Ok(())
    }

    fn kind(&self) -> Kind {
        match self.body {
            Body::Mapping(_) => Kind::Mapping,
            Body::Sequence(_) => Kind::Sequence,
        }
    }
}

/// Which properties a snapshot includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum View {
    /// Everything, callables included. Holes read as null.
    Full,
    /// What the backing store receives: enumerable properties only, callables
    /// dropped from mappings and nulled in sequences.
    Persisted,
}

/// Index-addressed storage for every composite node of a tree.
///
/// Links between nodes never form a cycle. A slot stays allocated while it is
/// reachable from the root or held by a wrapper; [`Arena::collect`] releases
/// the rest for reuse.
#[derive(Debug, Default)]
pub(crate) struct Arena {
    slots: Vec<Slot>,
    free: Vec<NodeId>,
}

impl Arena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of allocated slots.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    fn alloc(&mut self, body: Body) -> NodeId {
        if let Some(id) = self.free.pop() {
            self.slots[id.0] = Slot::new(body);
            return id;
        }
        self.slots.push(Slot::new(body));
        NodeId(self.slots.len() - 1)
    }

    /// Returns the marker wrappers over `id` share, creating it if no wrapper
    /// is alive.
    pub fn pin(&mut self, id: NodeId) -> Arc<Pin> {
        let slot = self.slot_mut(id);
        if let Some(pin) = slot.pin.upgrade() {
            return pin;
        }
        let pin = Arc::new(Pin);
        slot.pin = Arc::downgrade(&pin);
        pin
    }

    /// Releases every slot that is neither reachable from `root` nor held by
    /// a wrapper, following property links and prototype links. Returns the
    /// number of slots released.
    pub fn collect(&mut self, root: NodeId) -> usize {
        let mut vacant = vec![false; self.slots.len()];
        for id in &self.free {
            vacant[id.0] = true;
        }

        let mut stack = vec![root];
        for (i, slot) in self.slots.iter().enumerate() {
            if !vacant[i] && slot.pin.strong_count() > 0 {
                stack.push(NodeId(i));
            }
        }
        let mut marked = vec![false; self.slots.len()];
        while let Some(id) = stack.pop() {
            if std::mem::replace(&mut marked[id.0], true) {
                continue;
            }
            let slot = self.slot(id);
            stack.extend(slot.proto);
            stack.extend(slot.children());
        }

        let mut released = 0;
        for i in 0..self.slots.len() {
            if !marked[i] && !vacant[i] {
                self.slots[i] = Slot::new(Body::Mapping(IndexMap::new()));
                self.free.push(NodeId(i));
                released += 1;
            }
        }
        released
    }

    /// Whether `target` is `from` or one of its descendants.
    fn reaches(&self, from: NodeId, target: NodeId) -> bool {
        let mut seen = vec![false; self.slots.len()];
        let mut stack = vec![from];
        while let Some(id) = stack.pop() {
            if id == target {
                return true;
            }
            if std::mem::replace(&mut seen[id.0], true) {
                continue;
            }
            stack.extend(self.slot(id).children());
        }
        false
    }

    /// Refuses to store `member` under `id` if that would make `id` its own
    /// descendant.
    fn check_link(&self, id: NodeId, member: &Member) -> Result<()> {
        match member {
            Member::Node(child) if self.reaches(*child, id) => Err(Rejection::Cycle.into()),
            _ => Ok(()),
        }
    }

    /// Moves a detached value into the arena.
    ///
    /// Mappings and sequences (recursively) get fresh slots; leaves are stored
    /// inline.
    pub fn adopt(&mut self, value: Value) -> Member {
        match value {
            Value::Mapping(map) => {
                let body = map
                    .into_iter()
                    .map(|(k, v)| (k, Property::new(self.adopt(v))))
                    .collect();
                Member::Node(self.alloc(Body::Mapping(body)))
            }
            Value::Sequence(items) => {
                let body = items
                    .into_iter()
                    .map(|v| Some(Property::new(self.adopt(v))))
                    .collect();
                Member::Node(self.alloc(Body::Sequence(body)))
            }
            leaf => Member::Leaf(leaf),
        }
    }

    pub fn slot(&self, id: NodeId) -> &Slot {
        &self.slots[id.0]
    }

    fn slot_mut(&mut self, id: NodeId) -> &mut Slot {
        &mut self.slots[id.0]
    }

    pub fn kind(&self, id: NodeId) -> Kind {
        self.slot(id).kind()
    }

    pub fn member_kind(&self, member: &Member) -> Kind {
        match member {
            Member::Leaf(v) => v.kind(),
            Member::Node(id) => self.kind(*id),
        }
    }

    pub fn own(&self, id: NodeId, key: &Key) -> Option<&Property> {
        self.slot(id).own(key)
    }

    /// Finds a property on the node or along its prototype chain.
    pub fn lookup(&self, id: NodeId, key: &Key) -> Option<&Property> {
        let mut current = Some(id);
        while let Some(node) = current {
            let slot = self.slot(node);
            if let Some(p) = slot.own(key) {
                return Some(p);
            }
            current = slot.proto;
        }
        None
    }

    pub fn own_keys(&self, id: NodeId) -> Vec<Key> {
        match &self.slot(id).body {
            Body::Mapping(map) => map.keys().map(|k| Key::Name(k.clone())).collect(),
            Body::Sequence(items) => items
                .iter()
                .enumerate()
                .filter(|(_, p)| p.is_some())
                .map(|(i, _)| Key::Index(i))
                .collect(),
        }
    }

    /// Number of own properties of a mapping, or the length of a sequence
    /// including holes.
    pub fn len_of(&self, id: NodeId) -> usize {
        match &self.slot(id).body {
            Body::Mapping(map) => map.len(),
            Body::Sequence(items) => items.len(),
        }
    }

    pub fn is_frozen(&self, id: NodeId) -> bool {
        let slot = self.slot(id);
        !slot.extensible
            && slot
                .properties()
                .all(|p| !p.attrs.writable && !p.attrs.configurable)
    }

    /// Ordinary assignment: replaces an own writable property, or adds a new
    /// one unless the node is sealed against extension or an inherited
    /// property of the same key is read-only.
    pub fn write(&mut self, id: NodeId, key: &Key, member: Member) -> Result<()> {
        self.check_link(id, &member)?;
        if let Some(existing) = self.slot_mut(id).own_mut(key) {
            if !existing.attrs.writable {
                return Err(Rejection::ReadOnly(key.clone()).into());
            }
            existing.member = member;
            return Ok(());
        }
        if let Some(inherited) = self.lookup(id, key) {
            if !inherited.attrs.writable {
                return Err(Rejection::ReadOnly(key.clone()).into());
            }
        }
        self.slot_mut(id).insert_new(key, Property::new(member))
    }

    /// Removes an own property. Returns false if there was nothing to remove.
    pub fn remove(&mut self, id: NodeId, key: &Key) -> Result<bool> {
        let slot = self.slot_mut(id);
        match slot.own(key) {
            None => return Ok(false),
            Some(p) if !p.attrs.configurable => {
                return Err(Rejection::NonConfigurable(key.clone()).into());
            }
            Some(_) => {}
        }
        match &mut slot.body {
            Body::Mapping(map) => {
                map.shift_remove(&key.to_name());
            }
            Body::Sequence(items) => {
                if let Some(i) = key.as_index() {
                    items[i] = None;
                }
            }
        }
        Ok(true)
    }

    /// Creates or reconfigures an own property.
    pub fn define(&mut self, id: NodeId, key: &Key, member: Member, attrs: Attributes) -> Result<()> {
        self.check_link(id, &member)?;
        let same = self
            .own(id, key)
            .map(|existing| self.same_member(&existing.member, &member));
        let slot = self.slot_mut(id);
        if let (Some(existing), Some(same)) = (slot.own_mut(key), same) {
            if !existing.attrs.configurable {
                let redefines = attrs.configurable
                    || attrs.enumerable != existing.attrs.enumerable
                    || (!existing.attrs.writable && (attrs.writable || !same));
                if redefines {
                    return Err(Rejection::NonConfigurable(key.clone()).into());
                }
            }
            existing.member = member;
            existing.attrs = attrs;
            return Ok(());
        }
        slot.insert_new(key, Property { member, attrs })
    }

    fn same_member(&self, a: &Member, b: &Member) -> bool {
        match (a, b) {
            (Member::Leaf(a), Member::Leaf(b)) => a == b,
            (Member::Node(a), Member::Node(b)) => a == b,
            _ => false,
        }
    }

    pub fn set_proto(&mut self, id: NodeId, proto: Option<NodeId>) -> Result<()> {
        let slot = self.slot(id);
        if slot.proto == proto {
            return Ok(());
        }
        if !slot.extensible {
            return Err(Rejection::NotExtensible.into());
        }
        let mut current = proto;
        while let Some(node) = current {
            if node == id {
                return Err(Rejection::PrototypeCycle.into());
            }
            current = self.slot(node).proto;
        }
        self.slot_mut(id).proto = proto;
        Ok(())
    }

    pub fn set_extensible(&mut self, id: NodeId, extensible: bool) -> Result<()> {
        let slot = self.slot_mut(id);
        if extensible && !slot.extensible {
            return Err(Rejection::Irreversible.into());
        }
        slot.extensible = extensible;
        Ok(())
    }

    pub fn freeze(&mut self, id: NodeId) {
        let slot = self.slot_mut(id);
        slot.extensible = false;
        for p in slot.properties_mut() {
            p.attrs.writable = false;
            p.attrs.configurable = false;
        }
    }

    pub fn push(&mut self, id: NodeId, member: Member) -> Result<usize> {
        self.check_link(id, &member)?;
        let slot = self.slot_mut(id);
        let found = slot.kind();
        let extensible = slot.extensible;
        match &mut slot.body {
            Body::Sequence(items) => {
                if !extensible {
                    return Err(Rejection::NotExtensible.into());
                }
                items.push(Some(Property::new(member)));
                Ok(items.len() - 1)
            }
            Body::Mapping(_) => Err(Error::InvalidNodeKind {
                expected: "sequence",
                found,
            }),
        }
    }

    /// Removes the last slot of a sequence. The outer `None` means the
    /// sequence was already empty; the inner `None` means the slot was a hole.
    ///
    /// A sequence that no longer accepts extensions keeps its length.
    pub fn pop(&mut self, id: NodeId) -> Result<Option<Option<Member>>> {
        let slot = self.slot_mut(id);
        let found = slot.kind();
        let extensible = slot.extensible;
        match &mut slot.body {
            Body::Sequence(items) => {
                if !extensible {
                    return Err(Rejection::NotExtensible.into());
                }
                let Some(last) = items.last() else {
                    return Ok(None);
                };
                if let Some(p) = last {
                    if !p.attrs.configurable {
                        let key = Key::Index(items.len() - 1);
                        return Err(Rejection::NonConfigurable(key).into());
                    }
                }
                Ok(items.pop().map(|p| p.map(|p| p.member)))
            }
            Body::Mapping(_) => Err(Error::InvalidNodeKind {
                expected: "sequence",
                found,
            }),
        }
    }

    /// Rebuilds a detached value from a node.
    ///
    /// Shared nodes are copied at each position. Writes refuse to link a node
    /// under itself; should a cycle still be found, the snapshot fails with
    /// [`Error::Cycle`].
    pub fn snapshot(&self, id: NodeId, view: View) -> Result<Value> {
        let mut visiting = vec![false; self.slots.len()];
        self.snapshot_node(id, view, &mut visiting)
    }

    fn snapshot_node(&self, id: NodeId, view: View, visiting: &mut [bool]) -> Result<Value> {
        if visiting[id.0] {
            return Err(Error::Cycle);
        }
        visiting[id.0] = true;

        let value = match &self.slot(id).body {
            Body::Mapping(map) => {
                let mut out = IndexMap::with_capacity(map.len());
                for (k, p) in map {
                    if view == View::Persisted
                        && (!p.attrs.enumerable || matches!(p.member, Member::Leaf(Value::Callable(_))))
                    {
                        continue;
                    }
                    out.insert(k.clone(), self.snapshot_member(&p.member, view, visiting)?);
                }
                Value::Mapping(out)
            }
            Body::Sequence(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    let v = match item {
                        None => Value::Null,
                        Some(p) if view == View::Persisted => match &p.member {
                            Member::Leaf(Value::Callable(_)) => Value::Null,
                            m => self.snapshot_member(m, view, visiting)?,
                        },
                        Some(p) => self.snapshot_member(&p.member, view, visiting)?,
                    };
                    out.push(v);
                }
                Value::Sequence(out)
            }
        };

        visiting[id.0] = false;
        Ok(value)
    }

    fn snapshot_member(&self, member: &Member, view: View, visiting: &mut [bool]) -> Result<Value> {
        match member {
            Member::Leaf(v) => Ok(v.clone()),
            Member::Node(child) => self.snapshot_node(*child, view, visiting),
        }
    }
}
