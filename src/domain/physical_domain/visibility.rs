use super::*;

impl PhysicalDomain {
    /// Creates or destroys the view proxy after the entity's `perceptive` flag changed.
    pub fn toggle_child_perception(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get(&id) else {
            warn!(entity = id, "perception toggled for unknown entity");
            return;
        };
        let had_view = entry.view_proxy.is_some();
        let perceptive = self.entity(id).borrow().perceptive;

        if perceptive {
            self.link_observation(id, self.domain_id);
            if !had_view {
                self.create_visibility_proxies(id);
                self.update_observer_entry(id, true);
            }
        } else {
            if let Some(view) = self.entries.get_mut(&id).and_then(|e| e.view_proxy.take()) {
                self.visibility.remove_proxy(view);
            }
            let observed = self
                .entries
                .get_mut(&id)
                .map(|e| std::mem::take(&mut e.observed_by_this))
                .unwrap_or_default();
            for other in observed {
                if let Some(other) = self.entries.get_mut(&other) {
                    other.observing_this.remove(&id);
                }
            }
        }
        debug!(entity = id, perceptive, "perception toggled");
    }

    /// Records that `observer` observes `observed`, on both sides, without notifying.
    pub(super) fn link_observation(&mut self, observer: EntityId, observed: EntityId) {
        if let Some(entry) = self.entries.get_mut(&observer) {
            entry.observed_by_this.insert(observed);
        }
        if let Some(entry) = self.entries.get_mut(&observed) {
            entry.observing_this.insert(observer);
        }
    }

    /// Creates the missing proxies of a placed entry.
    pub(super) fn create_visibility_proxies(&mut self, id: EntityId) {
        let entity_ref = self.entity(id);
        let entity = entity_ref.borrow();
        let Some(pos) = entity.location.pos.filter(|_| entity.location.is_valid()) else {
            return;
        };
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        if entry.kind == EntryKind::Container {
            return;
        }

        let observable = match entry.observable_proxy {
            Some(handle) => Some(handle),
            None => Some(self.visibility.insert_proxy(
                id,
                ProxyKind::Observable,
                entry.observable_radius,
                &pos,
            )),
        };
        let view = match (entry.view_proxy, entity.perceptive) {
            (Some(handle), _) => Some(handle),
            (None, true) => {
                let radius =
                    visibility_consts::VIEW_SPHERE_RADIUS / self.visibility.scaling_factor();
                Some(self.visibility.insert_proxy(id, ProxyKind::View, radius, &pos))
            }
            (None, false) => None,
        };

        if let Some(entry) = self.entries.get_mut(&id) {
            entry.observable_proxy = observable;
            entry.view_proxy = view;
        }
        self.dirty.insert(id);
    }

    pub(super) fn move_visibility_proxies(&mut self, id: EntityId, pos: &Point3<f32>) {
        let Some(entry) = self.entries.get(&id) else {
            return;
        };
        for handle in [entry.observable_proxy, entry.view_proxy].into_iter().flatten() {
            self.visibility.move_proxy(handle, pos);
        }
    }

    pub(super) fn destroy_visibility_proxies(&mut self, id: EntityId) {
        let Some(entry) = self.entries.get_mut(&id) else {
            return;
        };
        let handles = [entry.observable_proxy.take(), entry.view_proxy.take()];
        for handle in handles.into_iter().flatten() {
            self.visibility.remove_proxy(handle);
        }
    }

    /// Recomputes what `id` observes and notifies `id` of every change.
    pub(super) fn update_observer_entry(&mut self, id: EntityId, emit: bool) {
        let Some(view) = self.entries.get(&id).and_then(|e| e.view_proxy) else {
            return;
        };
        let mut now = self.visibility.contact_test(view, ProxyKind::View);
        now.remove(&id);
        now.retain(|other| self.entries.contains_key(other));
        // A perceptive entity always perceives its container
        now.insert(self.domain_id);

        let previous = self
            .entries
            .get(&id)
            .map(|e| e.observed_by_this.clone())
            .unwrap_or_default();

        for &appeared in now.difference(&previous) {
            if let Some(other) = self.entries.get_mut(&appeared) {
                other.observing_this.insert(id);
            }
            if emit {
                let stamp = self.entity(appeared).borrow().seq;
                self.notify(Notification::Appear {
                    observer: id,
                    subject: appeared,
                    stamp,
                });
            }
        }
        for &gone in previous.difference(&now) {
            if let Some(other) = self.entries.get_mut(&gone) {
                other.observing_this.remove(&id);
            }
            if emit {
                let stamp = self.entity(gone).borrow().seq;
                self.notify(Notification::Disappear {
                    observer: id,
                    subject: gone,
                    stamp,
                });
            }
        }

        if let Some(entry) = self.entries.get_mut(&id) {
            entry.observed_by_this = now;
        }
    }

    /// Recomputes who observes `id` and notifies each observer that gained or lost it.
    pub(super) fn update_observed_entry(&mut self, id: EntityId, emit: bool) {
        let Some(observable) = self.entries.get(&id).and_then(|e| e.observable_proxy) else {
            return;
        };
        let mut now = self.visibility.contact_test(observable, ProxyKind::Observable);
        now.remove(&id);
        now.retain(|other| self.entries.contains_key(other));
        if self.domain_entity.borrow().perceptive {
            now.insert(self.domain_id);
        }

        let previous = self
            .entries
            .get(&id)
            .map(|e| e.observing_this.clone())
            .unwrap_or_default();
        let stamp = self.entity(id).borrow().seq;

        for &observer in now.difference(&previous) {
            if let Some(other) = self.entries.get_mut(&observer) {
                other.observed_by_this.insert(id);
            }
            if emit {
                self.notify(Notification::Appear {
                    observer,
                    subject: id,
                    stamp,
                });
            }
        }
        for &observer in previous.difference(&now) {
            if let Some(other) = self.entries.get_mut(&observer) {
                other.observed_by_this.remove(&id);
            }
            if emit {
                self.notify(Notification::Disappear {
                    observer,
                    subject: id,
                    stamp,
                });
            }
        }

        if let Some(entry) = self.entries.get_mut(&id) {
            entry.observing_this = now;
        }
    }

    /// Visibility pass over every entry that moved since the last pass.
    pub(super) fn update_visibility_of_dirty_entries(&mut self) {
        let dirty = std::mem::take(&mut self.dirty);
        for id in dirty {
            if !self.entries.contains_key(&id) {
                continue;
            }
            self.update_observed_entry(id, true);
            self.update_observer_entry(id, true);
        }
    }
}
