use std::any::Any;
use std::rc;
use std::sync::{self, Arc};

use bevy::prelude::{Component, Entity, World};

/// A non-owning reference to an object whose lifetime a coroutine can be bound to.
///
/// Holding a [`WeakOwner`] never keeps the object alive. The only thing it can tell is whether
/// the object still exists.
#[derive(Clone)]
pub struct WeakOwner {
    anchor: Anchor,
}

#[derive(Clone)]
enum Anchor {
    Shared(sync::Weak<dyn Any + Send + Sync>),
    Local(rc::Weak<dyn Any>),
}

impl WeakOwner {
    /// Observe an object shared through an [`Arc`].
    pub fn new<T: Send + Sync + 'static>(owner: &Arc<T>) -> Self {
        let weak = Arc::downgrade(owner);
        let weak: sync::Weak<dyn Any + Send + Sync> = weak;
        Self {
            anchor: Anchor::Shared(weak),
        }
    }

    /// Observe an object shared through an [`Rc`](std::rc::Rc).
    pub fn from_rc<T: 'static>(owner: &rc::Rc<T>) -> Self {
        let weak = rc::Rc::downgrade(owner);
        let weak: rc::Weak<dyn Any> = weak;
        Self {
            anchor: Anchor::Local(weak),
        }
    }

    /// Observe an [`Entity`]. The entity gets an [`OwnerAnchor`] if it does not have one yet, and
    /// the owner dies once the entity is despawned (or the anchor removed).
    ///
    /// Returns `None` if the entity does not exist.
    pub fn from_entity(world: &mut World, entity: Entity) -> Option<Self> {
        let mut entity = world.get_entity_mut(entity)?;
        if let Some(anchor) = entity.get::<OwnerAnchor>() {
            return Some(Self::new(&anchor.0));
        }

        let anchor = OwnerAnchor::default();
        let owner = Self::new(&anchor.0);
        entity.insert(anchor);
        Some(owner)
    }

    /// Returns true while the observed object still exists.
    pub fn is_alive(&self) -> bool {
        match &self.anchor {
            Anchor::Shared(weak) => weak.strong_count() > 0,
            Anchor::Local(weak) => weak.strong_count() > 0,
        }
    }

    /// Returns true if both refer to the same object.
    pub fn same_owner(&self, other: &WeakOwner) -> bool {
        match (&self.anchor, &other.anchor) {
            (Anchor::Shared(a), Anchor::Shared(b)) => a.ptr_eq(b),
            (Anchor::Local(a), Anchor::Local(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl std::fmt::Debug for WeakOwner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WeakOwner")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Lifetime marker of an [`Entity`] used as a coroutine owner. It is dropped together with the
/// entity, which is what kills every [`WeakOwner`] created from it.
#[derive(Component, Default)]
pub struct OwnerAnchor(Arc<()>);
