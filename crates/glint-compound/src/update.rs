// Copyright 2025 The glint authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The per-frame update pass.
//!
//! Recomputes the inherited attributes of every compound from its declared
//! attributes and its parent, top-down in tree order, and assigns each
//! compound the task id render statistics will report against. The pass
//! derives everything from scratch each frame, so balancer rewrites of the
//! declared viewports and ranges take effect on the very next update.

use crate::attributes::{CompoundDefaults, CompoundInherit, StereoMode};
use crate::tree::{CompoundId, CompoundTree};
use glint_core::math::Zoom;
use glint_core::resource::ResourceDirectory;
use glint_core::task::{Eye, TaskFlags};

/// A callback fired for each compound before its inherit is recomputed.
///
/// Balancers attach here: a hook on an interior compound rewrites the
/// declared viewports or ranges of the children, and since children are
/// visited afterwards, the rewrite is picked up within the same pass.
pub type PreUpdateHook<'a> = dyn FnMut(&mut CompoundTree, CompoundId, u32) + 'a;

/// Runs the update pass for `frame` over all roots of `tree`.
pub fn update_pass(
    tree: &mut CompoundTree,
    frame: u32,
    defaults: &CompoundDefaults,
    resources: &dyn ResourceDirectory,
) {
    update_pass_with(tree, frame, defaults, resources, &mut |_, _, _| {});
}

/// Runs the update pass, firing `pre_update` on every compound just before
/// its inherited attributes are recomputed.
pub fn update_pass_with(
    tree: &mut CompoundTree,
    frame: u32,
    defaults: &CompoundDefaults,
    resources: &dyn ResourceDirectory,
    pre_update: &mut PreUpdateHook<'_>,
) {
    // Task ids are per-frame, pre-order, starting at 1; 0 means unassigned.
    let mut next_task_id = 1u32;
    for root in tree.roots().to_vec() {
        update_node(
            tree,
            root,
            None,
            frame,
            defaults,
            resources,
            pre_update,
            &mut next_task_id,
        );
    }
}

#[allow(clippy::too_many_arguments)]
fn update_node(
    tree: &mut CompoundTree,
    id: CompoundId,
    parent: Option<CompoundId>,
    frame: u32,
    defaults: &CompoundDefaults,
    resources: &dyn ResourceDirectory,
    pre_update: &mut PreUpdateHook<'_>,
    next_task_id: &mut u32,
) {
    tree.set_task_id(id, *next_task_id);
    *next_task_id += 1;

    pre_update(tree, id, frame);

    {
        let data = tree.data_mut(id);
        data.pixel.validate();
        data.subpixel.validate();
        data.zoom.validate();
    }
    let data = tree.data(id).clone();

    let mut inherit = match parent {
        None => inherit_root(tree, id, defaults, resources),
        Some(parent) => inherit_node(tree, id, parent, resources),
    };

    if let Some(channel) = inherit.channel {
        resolve_stereo(&mut inherit);

        let phase_active = frame % inherit.period == inherit.phase;
        let channel_active = resources.is_running(channel);
        let is_destination = tree.is_destination(id);
        for eye in Eye::ALL {
            let i = eye.index();
            let dest_active = if is_destination {
                data.active[i] > 0
            } else {
                inherit.active[i]
            };
            inherit.active[i] =
                dest_active && inherit.eyes.contains(eye) && phase_active && channel_active;
        }
    }

    if inherit.pvp.is_valid() {
        inherit.pvp.apply_pixel(&data.pixel);

        // Zoom the pvp, then fold the integer rounding error back into the
        // inherited zoom so compositing stays pixel-accurate.
        let unzoomed = inherit.pvp;
        inherit.pvp.apply_zoom(&data.zoom);
        let correction = inherit.pvp.zoom_for(&unzoomed);
        inherit.zoom.apply(&correction);
    }

    inherit.tasks = if data.tasks == TaskFlags::DEFAULT {
        if tree.is_leaf(id) {
            TaskFlags::ALL
        } else {
            TaskFlags::ASSEMBLE | TaskFlags::READBACK
        }
    } else {
        data.tasks
    };
    if tree.is_destination(id) {
        inherit.tasks |= TaskFlags::VIEW;
    } else {
        inherit.tasks = inherit.tasks.difference(TaskFlags::VIEW);
    }

    // Compounds with no pixels or no data execute nothing this frame.
    if !inherit.pvp.has_area() || !inherit.range.has_data() {
        inherit.tasks = TaskFlags::NONE;
    }

    log::trace!(
        "compound {} frame {frame}: pvp {} tasks {:#x}",
        id.0,
        inherit.pvp,
        inherit.tasks.bits()
    );
    *tree.inherit_mut(id) = inherit;

    for child in tree.children(id).to_vec() {
        update_node(
            tree,
            child,
            Some(id),
            frame,
            defaults,
            resources,
            pre_update,
            next_task_id,
        );
    }
}

fn inherit_root(
    tree: &CompoundTree,
    id: CompoundId,
    defaults: &CompoundDefaults,
    resources: &dyn ResourceDirectory,
) -> CompoundInherit {
    let data = tree.data(id);
    let mut inherit = CompoundInherit {
        channel: data.channel,
        viewport: data.viewport,
        range: data.range,
        pixel: data.pixel,
        subpixel: data.subpixel,
        zoom: Zoom::NONE, // data.zoom is folded in after pvp rounding
        pvp: Default::default(),
        eyes: if data.eyes.is_undefined() {
            defaults.eyes
        } else {
            data.eyes
        },
        tasks: TaskFlags::NONE,
        period: data.period.unwrap_or(defaults.period),
        phase: data.phase.unwrap_or(defaults.phase),
        max_fps: data.max_fps,
        buffers: if data.buffers.is_undefined() {
            defaults.buffers
        } else {
            data.buffers
        },
        active: [false; 3],
        stereo_mode: data.stereo_mode.unwrap_or(defaults.stereo_mode),
        anaglyph_left_mask: data
            .anaglyph_left_mask
            .unwrap_or(defaults.anaglyph_left_mask),
        anaglyph_right_mask: data
            .anaglyph_right_mask
            .unwrap_or(defaults.anaglyph_right_mask),
    };
    for (slot, &counter) in inherit.active.iter_mut().zip(data.active.iter()) {
        *slot = counter > 0;
    }
    if let Some(channel) = data.channel {
        inherit.pvp = resources.pixel_viewport(channel);
    }
    inherit
}

fn inherit_node(
    tree: &CompoundTree,
    id: CompoundId,
    parent: CompoundId,
    resources: &dyn ResourceDirectory,
) -> CompoundInherit {
    let mut inherit = tree.inherit(parent).clone();
    let data = tree.data(id);

    if inherit.channel.is_none() {
        if let Some(channel) = data.channel {
            inherit.channel = Some(channel);
            inherit.pvp = resources.pixel_viewport(channel);
        }
        inherit.viewport.apply(&data.viewport);
    } else if inherit.pvp.is_valid() {
        let parent_pvp = inherit.pvp;
        inherit.pvp.apply_viewport(&data.viewport);

        // Track the viewport through the integer-rounded pvp instead of the
        // declared fraction, keeping the frustum consistent with the pixels
        // actually rendered.
        let rounded = inherit.pvp.sub_viewport(&parent_pvp);
        inherit.viewport.apply(&rounded);
    }
    // else: the inherited channel is not running, keep the parent's extent.

    inherit.range.apply(&data.range);
    inherit.pixel.apply(&data.pixel);
    inherit.subpixel.apply(&data.subpixel);

    if !data.eyes.is_undefined() {
        inherit.eyes = data.eyes;
    }
    if let Some(period) = data.period {
        inherit.period = period;
    }
    if let Some(phase) = data.phase {
        inherit.phase = phase;
    }
    inherit.max_fps = data.max_fps;
    if !data.buffers.is_undefined() {
        inherit.buffers = data.buffers;
    }
    if let Some(mode) = data.stereo_mode {
        inherit.stereo_mode = mode;
    }
    if let Some(mask) = data.anaglyph_left_mask {
        inherit.anaglyph_left_mask = mask;
    }
    if let Some(mask) = data.anaglyph_right_mask {
        inherit.anaglyph_right_mask = mask;
    }
    inherit
}

/// Resolves [`StereoMode::Auto`] against the effective eye set. Without
/// stereo eyes one pass per destination suffices; with them, anaglyph keeps
/// both eyes on a monoscopic drawable.
fn resolve_stereo(inherit: &mut CompoundInherit) {
    if inherit.stereo_mode != StereoMode::Auto {
        return;
    }
    inherit.stereo_mode = if inherit.eyes.contains(Eye::Left) && inherit.eyes.contains(Eye::Right) {
        StereoMode::Anaglyph
    } else {
        StereoMode::Passive
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::{BufferFlags, CompoundData};
    use approx::assert_abs_diff_eq;
    use glint_core::math::{Range, Viewport};
    use glint_core::resource::{ChannelId, PipeId, ResourceMap};
    use glint_core::task::EyeFlags;

    fn directory() -> ResourceMap {
        let mut map = ResourceMap::new();
        map.insert_running(ChannelId(0), PipeId(0), 1000, 800);
        map.insert_running(ChannelId(1), PipeId(0), 1000, 800);
        map.insert_running(ChannelId(2), PipeId(1), 1000, 800);
        map
    }

    fn channel(id: u32) -> CompoundData {
        CompoundData {
            channel: Some(ChannelId(id)),
            ..Default::default()
        }
    }

    #[test]
    fn root_defaults_fill_undeclared_attributes() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(channel(0));
        let resources = directory();

        update_pass(&mut tree, 0, &CompoundDefaults::default(), &resources);

        let inherit = tree.inherit(root);
        assert_eq!(inherit.eyes, EyeFlags::ALL);
        assert_eq!(inherit.period, 1);
        assert_eq!(inherit.phase, 0);
        assert_eq!(inherit.buffers, BufferFlags::COLOR);
        assert_eq!(inherit.pvp.w, 1000);
        assert_eq!(inherit.pvp.h, 800);
        // A destination leaf does everything, including the view update.
        assert_eq!(inherit.tasks, TaskFlags::ALL | TaskFlags::VIEW);
        assert!(inherit.active.iter().all(|&a| a));
        // Auto stereo resolves to anaglyph when both stereo eyes render.
        assert_eq!(inherit.stereo_mode, StereoMode::Anaglyph);
    }

    #[test]
    fn viewport_splits_compose_without_gaps() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(channel(0));
        let left = tree.add_child(
            root,
            CompoundData {
                viewport: Viewport::new(0.0, 0.0, 0.375, 1.0),
                ..channel(1)
            },
        );
        let right = tree.add_child(
            root,
            CompoundData {
                viewport: Viewport::new(0.375, 0.0, 0.625, 1.0),
                ..channel(2)
            },
        );
        let resources = directory();

        update_pass(&mut tree, 0, &CompoundDefaults::default(), &resources);

        let lp = tree.inherit(left).pvp;
        let rp = tree.inherit(right).pvp;
        let root_pvp = tree.inherit(root).pvp;
        assert_eq!(lp.x_end(), rp.x);
        assert_eq!(rp.x_end(), root_pvp.x_end());
        assert_eq!(lp.area() + rp.area(), root_pvp.area());

        // The inherited fraction tracks the rounded pixels, not the input.
        let left_vp = tree.inherit(left).viewport;
        assert_abs_diff_eq!(left_vp.w, lp.w as f32 / 1000.0, epsilon = 1e-6);
        assert_abs_diff_eq!(left_vp.x, 0.0);
    }

    #[test]
    fn ranges_nest_multiplicatively() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(CompoundData {
            range: Range::new(0.0, 0.5),
            ..channel(0)
        });
        let child = tree.add_child(
            root,
            CompoundData {
                range: Range::new(0.5, 1.0),
                ..channel(1)
            },
        );
        let resources = directory();

        update_pass(&mut tree, 0, &CompoundDefaults::default(), &resources);

        let range = tree.inherit(child).range;
        assert_abs_diff_eq!(range.start, 0.25);
        assert_abs_diff_eq!(range.end, 0.5);
    }

    #[test]
    fn default_tasks_derive_from_tree_position() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(channel(0));
        let leaf = tree.add_child(root, channel(1));
        let declared = tree.add_child(
            root,
            CompoundData {
                tasks: TaskFlags::DRAW,
                ..channel(2)
            },
        );
        let resources = directory();

        update_pass(&mut tree, 0, &CompoundDefaults::default(), &resources);

        // Interior destination: composite and present, no drawing.
        assert_eq!(
            tree.inherit(root).tasks,
            TaskFlags::ASSEMBLE | TaskFlags::READBACK | TaskFlags::VIEW
        );
        assert_eq!(tree.inherit(leaf).tasks, TaskFlags::ALL);
        assert_eq!(tree.inherit(declared).tasks, TaskFlags::DRAW);
    }

    #[test]
    fn dead_work_is_eliminated() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(channel(0));
        let no_space = tree.add_child(
            root,
            CompoundData {
                viewport: Viewport::new(0.3, 0.0, 0.0, 1.0),
                ..channel(1)
            },
        );
        let no_data = tree.add_child(
            root,
            CompoundData {
                range: Range::new(0.4, 0.4),
                ..channel(2)
            },
        );
        let resources = directory();

        update_pass(&mut tree, 0, &CompoundDefaults::default(), &resources);

        assert_eq!(tree.inherit(no_space).tasks, TaskFlags::NONE);
        assert_eq!(tree.inherit(no_data).tasks, TaskFlags::NONE);
        assert_ne!(tree.inherit(root).tasks, TaskFlags::NONE);
    }

    #[test]
    fn period_and_phase_gate_activation() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(channel(0));
        let odd = tree.add_child(
            root,
            CompoundData {
                period: Some(2),
                phase: Some(1),
                ..channel(1)
            },
        );
        let resources = directory();
        let defaults = CompoundDefaults::default();

        update_pass(&mut tree, 0, &defaults, &resources);
        assert!(!tree.inherit(odd).active.iter().any(|&a| a));
        assert!(tree.inherit(root).active[0]);

        update_pass(&mut tree, 1, &defaults, &resources);
        assert!(tree.inherit(odd).active.iter().all(|&a| a));
    }

    #[test]
    fn stopped_channel_deactivates_the_subtree() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(channel(0));
        let mut resources = directory();
        resources.set_running(ChannelId(0), false);

        update_pass(&mut tree, 0, &CompoundDefaults::default(), &resources);

        assert!(!tree.inherit(root).active.iter().any(|&a| a));
        assert!(!tree.is_running(root, &resources));
    }

    #[test]
    fn task_ids_are_assigned_in_tree_order() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(channel(0));
        let a = tree.add_child(root, channel(1));
        let a1 = tree.add_child(a, channel(1));
        let b = tree.add_child(root, channel(2));
        let resources = directory();

        update_pass(&mut tree, 0, &CompoundDefaults::default(), &resources);

        assert_eq!(tree.task_id(root), 1);
        assert_eq!(tree.task_id(a), 2);
        assert_eq!(tree.task_id(a1), 3);
        assert_eq!(tree.task_id(b), 4);
    }

    #[test]
    fn pre_update_rewrites_apply_in_the_same_pass() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(channel(0));
        let child = tree.add_child(root, channel(1));
        let resources = directory();
        let defaults = CompoundDefaults::default();

        // A hook on the root reshapes the child before the child is visited.
        update_pass_with(&mut tree, 0, &defaults, &resources, &mut |tree, id, _| {
            if id == root {
                tree.data_mut(child).viewport = Viewport::new(0.0, 0.0, 0.5, 1.0);
            }
        });

        assert_eq!(tree.inherit(child).pvp.w, 500);
    }

    #[test]
    fn zoom_rounding_folds_into_inherited_zoom() {
        let mut tree = CompoundTree::new();
        let root = tree.add_root(CompoundData {
            zoom: glint_core::math::Zoom::new(0.5, 0.5),
            ..channel(0)
        });
        let mut resources = ResourceMap::new();
        resources.insert_running(ChannelId(0), PipeId(0), 333, 333);

        update_pass(&mut tree, 0, &CompoundDefaults::default(), &resources);

        let inherit = tree.inherit(root);
        assert_eq!(inherit.pvp.w, 167);
        assert_abs_diff_eq!(inherit.zoom.x, 167.0 / 333.0);
    }
}
