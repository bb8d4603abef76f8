use core::fmt;
use std::collections::BTreeMap;
use std::rc::Rc;

use simdrv_types::Name;

use crate::{AssignmentError, ResourceId, UsageId};

/// Notified after a table changes.
///
/// Observers run while the owning registry is borrowed, so they must not reach back into it.
pub trait AssignmentObserver {
    fn on_assigned(&self, _table: Name, _usage: UsageId, _resource: ResourceId) {}
    fn on_unassigned(&self, _table: Name, _usage: UsageId, _resource: ResourceId) {}
}

/// Usage to resource map plus the assignment status of every registered resource.
///
/// A usage holds at most one resource at a time. Removing an assignment never removes the
/// resource; that takes an explicit [`AssignmentTable::remove_resource`].
pub struct AssignmentTable {
    name: Name,
    status: BTreeMap<ResourceId, Option<UsageId>>,
    assigned: BTreeMap<UsageId, ResourceId>,
    observers: Vec<Rc<dyn AssignmentObserver>>,
}

impl AssignmentTable {
    pub fn new(name: Name) -> Self {
        Self {
            name,
            status: BTreeMap::new(),
            assigned: BTreeMap::new(),
            observers: Vec::new(),
        }
    }

    pub fn name(&self) -> Name {
        self.name
    }

    pub fn add_resource(&mut self, resource: ResourceId) -> Result<(), AssignmentError> {
        if self.status.contains_key(&resource) {
            return Err(AssignmentError::ResourceExists {
                table: self.name,
                op: "add_resource",
                resource,
            });
        }
        self.status.insert(resource, None);
        tracing::trace!(table = %self.name, %resource, "resource added");
        Ok(())
    }

    pub fn remove_resource(&mut self, resource: ResourceId) -> Result<(), AssignmentError> {
        match self.status.get(&resource) {
            None => Err(AssignmentError::ResourceNotFound {
                table: self.name,
                op: "remove_resource",
                resource,
            }),
            Some(Some(usage)) => Err(AssignmentError::ResourceAssigned {
                table: self.name,
                op: "remove_resource",
                resource,
                usage: *usage,
            }),
            Some(None) => {
                self.status.remove(&resource);
                tracing::trace!(table = %self.name, %resource, "resource removed");
                Ok(())
            }
        }
    }

    pub fn assign(&mut self, usage: UsageId, resource: ResourceId) -> Result<(), AssignmentError> {
        const OP: &str = "assign";
        match self.status.get(&resource) {
            None => {
                return Err(AssignmentError::ResourceNotFound {
                    table: self.name,
                    op: OP,
                    resource,
                })
            }
            Some(Some(holder)) => {
                return Err(AssignmentError::ResourceAssigned {
                    table: self.name,
                    op: OP,
                    resource,
                    usage: *holder,
                })
            }
            Some(None) => {}
        }
        if let Some(held) = self.assigned.get(&usage) {
            return Err(AssignmentError::UsageAssigned {
                table: self.name,
                op: OP,
                usage,
                resource: *held,
            });
        }

        self.status.insert(resource, Some(usage));
        self.assigned.insert(usage, resource);
        tracing::debug!(table = %self.name, %usage, %resource, "resource assigned");

        for observer in &self.observers {
            observer.on_assigned(self.name, usage, resource);
        }
        Ok(())
    }

    /// Assigns the lowest free resource called `name` to `usage` and returns it.
    pub fn assign_any(&mut self, usage: UsageId, name: Name) -> Result<ResourceId, AssignmentError> {
        let available = self
            .status
            .iter()
            .find(|(resource, holder)| resource.name() == name && holder.is_none())
            .map(|(resource, _)| *resource)
            .ok_or(AssignmentError::NoResourceAvailable {
                table: self.name,
                op: "assign_any",
                usage,
                name,
            })?;
        self.assign(usage, available)?;
        Ok(available)
    }

    pub fn get_assigned_to(&self, usage: UsageId) -> Result<ResourceId, AssignmentError> {
        self.assigned
            .get(&usage)
            .copied()
            .ok_or(AssignmentError::UsageNotAssigned {
                table: self.name,
                op: "get_assigned_to",
                usage,
            })
    }

    pub fn is_assigned(&self, usage: UsageId) -> bool {
        self.assigned.contains_key(&usage)
    }

    /// Usage currently holding `resource`, if the resource is registered and assigned.
    pub fn usage_of(&self, resource: ResourceId) -> Option<UsageId> {
        self.status.get(&resource).copied().flatten()
    }

    pub fn contains_resource(&self, resource: ResourceId) -> bool {
        self.status.contains_key(&resource)
    }

    /// Removes the assignment held by `usage` and returns the released resource, which stays
    /// registered.
    pub fn unassign(&mut self, usage: UsageId) -> Result<ResourceId, AssignmentError> {
        let resource = self
            .assigned
            .remove(&usage)
            .ok_or(AssignmentError::UsageNotAssigned {
                table: self.name,
                op: "unassign",
                usage,
            })?;
        self.status.insert(resource, None);
        tracing::debug!(table = %self.name, %usage, %resource, "resource unassigned");

        for observer in &self.observers {
            observer.on_unassigned(self.name, usage, resource);
        }
        Ok(resource)
    }

    /// Registered resources in id order.
    pub fn resources(&self) -> impl Iterator<Item = ResourceId> + '_ {
        self.status.keys().copied()
    }

    /// Current assignments in usage order.
    pub fn assignments(&self) -> impl Iterator<Item = (UsageId, ResourceId)> + '_ {
        self.assigned.iter().map(|(usage, resource)| (*usage, *resource))
    }

    pub fn len(&self) -> usize {
        self.status.len()
    }

    pub fn is_empty(&self) -> bool {
        self.status.is_empty()
    }

    pub fn add_observer(
        &mut self,
        observer: Rc<dyn AssignmentObserver>,
    ) -> Result<(), AssignmentError> {
        if self.observer_position(&observer).is_some() {
            return Err(AssignmentError::ObserverExists {
                table: self.name,
                op: "add_observer",
            });
        }
        self.observers.push(observer);
        Ok(())
    }

    pub fn remove_observer(
        &mut self,
        observer: &Rc<dyn AssignmentObserver>,
    ) -> Result<(), AssignmentError> {
        let pos = self
            .observer_position(observer)
            .ok_or(AssignmentError::ObserverNotFound {
                table: self.name,
                op: "remove_observer",
            })?;
        self.observers.remove(pos);
        Ok(())
    }

    fn observer_position(&self, observer: &Rc<dyn AssignmentObserver>) -> Option<usize> {
        self.observers
            .iter()
            .position(|o| core::ptr::addr_eq(Rc::as_ptr(o), Rc::as_ptr(observer)))
    }
}

impl fmt::Debug for AssignmentTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssignmentTable")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    const VOL0: UsageId = UsageId::new(Name::Volume, 0);
    const VOL1: UsageId = UsageId::new(Name::Volume, 1);
    const MEM1: ResourceId = ResourceId::new(Name::Memory, 1);
    const MEM2: ResourceId = ResourceId::new(Name::Memory, 2);

    #[test]
    fn assign_requires_a_free_resource_and_a_free_usage() {
        let mut table = AssignmentTable::new(Name::VolumeMemory);
        assert!(matches!(
            table.assign(VOL0, MEM1),
            Err(AssignmentError::ResourceNotFound { op: "assign", .. })
        ));

        table.add_resource(MEM1).unwrap();
        table.add_resource(MEM2).unwrap();
        table.assign(VOL0, MEM1).unwrap();

        assert_eq!(
            table.assign(VOL1, MEM1),
            Err(AssignmentError::ResourceAssigned {
                table: Name::VolumeMemory,
                op: "assign",
                resource: MEM1,
                usage: VOL0,
            })
        );
        assert_eq!(
            table.assign(VOL0, MEM2),
            Err(AssignmentError::UsageAssigned {
                table: Name::VolumeMemory,
                op: "assign",
                usage: VOL0,
                resource: MEM1,
            })
        );
        assert_eq!(table.usage_of(MEM1), Some(VOL0));
        assert_eq!(table.usage_of(MEM2), None);
    }

    #[test]
    fn duplicate_resources_are_rejected() {
        let mut table = AssignmentTable::new(Name::VolumeMemory);
        table.add_resource(MEM1).unwrap();
        assert!(matches!(
            table.add_resource(MEM1),
            Err(AssignmentError::ResourceExists { .. })
        ));
        assert!(matches!(
            table.remove_resource(MEM2),
            Err(AssignmentError::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn assign_any_picks_the_lowest_free_resource() {
        let mut table = AssignmentTable::new(Name::SurfaceMemory);
        table.add_resource(ResourceId::new(Name::Surface, 9)).unwrap();
        table.add_resource(MEM2).unwrap();
        table.add_resource(MEM1).unwrap();

        assert_eq!(table.assign_any(VOL0, Name::Memory), Ok(MEM1));
        assert_eq!(table.assign_any(VOL1, Name::Memory), Ok(MEM2));
        assert_eq!(
            table.assign_any(UsageId::new(Name::Volume, 2), Name::Memory),
            Err(AssignmentError::NoResourceAvailable {
                table: Name::SurfaceMemory,
                op: "assign_any",
                usage: UsageId::new(Name::Volume, 2),
                name: Name::Memory,
            })
        );
    }

    #[derive(Default)]
    struct Recorder {
        events: RefCell<Vec<(bool, UsageId, ResourceId)>>,
    }

    impl AssignmentObserver for Recorder {
        fn on_assigned(&self, _table: Name, usage: UsageId, resource: ResourceId) {
            self.events.borrow_mut().push((true, usage, resource));
        }

        fn on_unassigned(&self, _table: Name, usage: UsageId, resource: ResourceId) {
            self.events.borrow_mut().push((false, usage, resource));
        }
    }

    #[test]
    fn observers_see_assignments_after_the_update() {
        let recorder = Rc::new(Recorder::default());
        let observer: Rc<dyn AssignmentObserver> = recorder.clone();

        let mut table = AssignmentTable::new(Name::VolumeMemory);
        table.add_observer(observer.clone()).unwrap();
        assert!(matches!(
            table.add_observer(observer.clone()),
            Err(AssignmentError::ObserverExists { .. })
        ));

        table.add_resource(MEM1).unwrap();
        table.assign(VOL0, MEM1).unwrap();
        table.unassign(VOL0).unwrap();
        table.remove_observer(&observer).unwrap();
        table.assign(VOL0, MEM1).unwrap();

        assert_eq!(
            *recorder.events.borrow(),
            vec![(true, VOL0, MEM1), (false, VOL0, MEM1)]
        );
        assert!(matches!(
            table.remove_observer(&observer),
            Err(AssignmentError::ObserverNotFound { .. })
        ));
    }
}
