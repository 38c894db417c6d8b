use ash::vk;
use smallvec::SmallVec;
use crate::renderer::core::error::{HarnessError, HarnessResult};

pub struct Queue {
    pub family_index: u32,
    pub handle: vk::Queue,
}

impl Queue {
    pub fn new(
        family_index: u32,
        handle: vk::Queue,
    ) -> Self {
        Self {
            family_index,
            handle,
        }
    }
}

/// Queue family chosen for each kind of work. Families may alias.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub compute: u32,
    pub transfer: u32,
}

impl QueueFamilyIndices {
    /// Distinct families in graphics, compute, transfer order.
    pub fn unique(&self) -> SmallVec<[u32; 3]> {
        let mut families = SmallVec::new();
        for index in [self.graphics, self.compute, self.transfer] {
            if !families.contains(&index) {
                families.push(index);
            }
        }
        families
    }
}

/// Finds the family to use for `flags`.
///
/// Compute prefers a family without graphics, transfer one without graphics
/// and compute. Anything else takes the first family that contains the flags.
pub fn queue_family_index(
    families: &[vk::QueueFamilyProperties],
    flags: vk::QueueFlags,
) -> Option<u32> {
    let dedicated_exclusions = if flags == vk::QueueFlags::COMPUTE {
        vk::QueueFlags::GRAPHICS
    } else if flags == vk::QueueFlags::TRANSFER {
        vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE
    } else {
        vk::QueueFlags::empty()
    };

    let usable = |family: &&vk::QueueFamilyProperties| {
        family.queue_count > 0 && family.queue_flags.contains(flags)
    };

    if !dedicated_exclusions.is_empty() {
        let dedicated = families
            .iter()
            .enumerate()
            .find(|(_, family)| {
                usable(family) && !family.queue_flags.intersects(dedicated_exclusions)
            });
        if let Some((index, _)) = dedicated {
            return Some(index as u32);
        }
    }

    families
        .iter()
        .position(|family| usable(&family))
        .map(|index| index as u32)
}

/// Picks a family for graphics and for each requested capability.
///
/// Graphics is always resolved. Compute and transfer alias the graphics family
/// unless they are part of `requested`.
pub fn negotiate_queue_families(
    families: &[vk::QueueFamilyProperties],
    requested: vk::QueueFlags,
) -> HarnessResult<QueueFamilyIndices> {
    let graphics = queue_family_index(families, vk::QueueFlags::GRAPHICS)
        .ok_or(HarnessError::NoQueueFamily(vk::QueueFlags::GRAPHICS))?;

    let resolve = |flags: vk::QueueFlags| -> HarnessResult<u32> {
        if requested.contains(flags) {
            queue_family_index(families, flags).ok_or(HarnessError::NoQueueFamily(flags))
        } else {
            Ok(graphics)
        }
    };

    Ok(QueueFamilyIndices {
        graphics,
        compute: resolve(vk::QueueFlags::COMPUTE)?,
        transfer: resolve(vk::QueueFlags::TRANSFER)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    fn typical_families() -> Vec<vk::QueueFamilyProperties> {
        vec![
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::TRANSFER),
        ]
    }

    #[test]
    fn compute_request_prefers_compute_only_family() {
        let families = vec![
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE),
            family(vk::QueueFlags::COMPUTE),
        ];

        let indices = negotiate_queue_families(&families, vk::QueueFlags::COMPUTE).unwrap();

        assert_eq!(indices.graphics, 0);
        assert_eq!(indices.compute, 1);
        assert_eq!(indices.transfer, 0);
    }

    #[test]
    fn transfer_request_prefers_transfer_only_family() {
        let indices = negotiate_queue_families(
            &typical_families(),
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        ).unwrap();

        assert_eq!(indices, QueueFamilyIndices { graphics: 0, compute: 1, transfer: 2 });
        assert_eq!(indices.unique().as_slice(), &[0, 1, 2]);
    }

    #[test]
    fn falls_back_to_first_family_containing_the_flag() {
        let families = vec![
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];

        let indices = negotiate_queue_families(
            &families,
            vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER,
        ).unwrap();

        assert_eq!(indices.graphics, 1);
        assert_eq!(indices.compute, 1);
        assert_eq!(indices.transfer, 0);
    }

    #[test]
    fn unrequested_capabilities_alias_graphics() {
        let indices = negotiate_queue_families(&typical_families(), vk::QueueFlags::GRAPHICS).unwrap();

        assert_eq!(indices, QueueFamilyIndices { graphics: 0, compute: 0, transfer: 0 });
        assert_eq!(indices.unique().len(), 1);
    }

    #[test]
    fn missing_graphics_family_is_fatal() {
        let families = vec![family(vk::QueueFlags::COMPUTE)];

        let err = negotiate_queue_families(&families, vk::QueueFlags::COMPUTE).unwrap_err();

        assert!(matches!(err, HarnessError::NoQueueFamily(flags) if flags == vk::QueueFlags::GRAPHICS));
    }

    #[test]
    fn empty_families_are_skipped() {
        let mut families = typical_families();
        families[1].queue_count = 0;

        assert_eq!(queue_family_index(&families, vk::QueueFlags::COMPUTE), Some(0));
    }
}
