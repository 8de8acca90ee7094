//! Animation import.
//!
//! glTF animations target many nodes at once. Here they are split into one
//! [`Animation`] per (glTF animation, target node), holding one scalar
//! [`Channel`] per animated component.

use std::sync::Arc;

use hashbrown::HashMap;

use crate::accessor::AccessorView;
use crate::animation::Animation;
use crate::channel::{Channel, ChannelTarget, Interpolator, Keyframe};
use crate::error::ImportError;
use crate::node::NodeId;
use crate::scene::Scene;

use super::Importer;

impl Importer<'_> {
    pub(crate) fn import_animations(
        &mut self,
        scene: &mut Scene,
        document: &gltf::Document,
        node_map: &HashMap<usize, NodeId>,
    ) -> Result<(), ImportError> {
        for gltf_animation in document.animations() {
            let animation_name = gltf_animation
                .name()
                .map(str::to_string)
                .unwrap_or_else(|| format!("animation_{}", gltf_animation.index()));

            // Target nodes in first-seen order
            let mut targets: Vec<(NodeId, Vec<Arc<Channel>>)> = Vec::new();

            for gltf_channel in gltf_animation.channels() {
                let target = gltf_channel.target();
                let Some(&id) = node_map.get(&target.node().index()) else {
                    tracing::warn!(
                        "{}: channel targets node {} outside the imported scene",
                        animation_name,
                        target.node().index()
                    );
                    continue;
                };
                let channel_target = match target.property() {
                    gltf::animation::Property::Translation => ChannelTarget::Translate,
                    gltf::animation::Property::Rotation => ChannelTarget::Rotate,
                    gltf::animation::Property::Scale => ChannelTarget::Scale,
                    gltf::animation::Property::MorphTargetWeights => {
                        tracing::warn!("{}: morph target weights are not supported", animation_name);
                        continue;
                    }
                };

                let node_name = scene
                    .graph
                    .get(id)
                    .map(|n| n.name.clone())
                    .unwrap_or_default();
                let prefix = format!("{}_{}_{}", animation_name, node_name, channel_target.name());
                let channels = self.import_channel(&gltf_channel, channel_target, &prefix)?;

                match targets.iter_mut().find(|(target, _)| *target == id) {
                    Some((_, existing)) => existing.extend(channels),
                    None => targets.push((id, channels)),
                }
            }

            for (id, channels) in targets {
                let Some(node) = scene.graph.get_mut(id) else {
                    continue;
                };
                let name = format!("{}_{}", animation_name, node.name);
                let template = Animation::with_channels(name.clone(), channels);
                if !self.registry.insert_animation(template.clone()) {
                    tracing::debug!("Animation {} already registered", name);
                }
                let instance = self
                    .registry
                    .animation(&name)
                    .cloned()
                    .unwrap_or(template);
                node.add_animation(instance);
            }
        }
        Ok(())
    }

    /// Split one glTF channel into per-component channels.
    fn import_channel(
        &mut self,
        gltf_channel: &gltf::animation::Channel<'_>,
        target: ChannelTarget,
        prefix: &str,
    ) -> Result<Vec<Arc<Channel>>, ImportError> {
        let sampler = gltf_channel.sampler();
        let invalid = |reason: String| ImportError::Animation {
            name: prefix.to_string(),
            reason,
        };

        let input = AccessorView::new(&sampler.input(), &self.buffers)
            .ok_or_else(|| ImportError::accessor(format!("{} input", prefix)))?;
        let output = AccessorView::new(&sampler.output(), &self.buffers)
            .ok_or_else(|| ImportError::accessor(format!("{} output", prefix)))?;

        if input.components() != 1 || !input.component_type().is_float() {
            return Err(invalid("key times must be float scalars".to_string()));
        }
        let times = (0..input.count())
            .map(|i| input.floats::<1>(i).map(|[t]| t))
            .collect::<Option<Vec<f32>>>()
            .ok_or_else(|| ImportError::accessor(format!("{} input", prefix)))?;

        let components = target.element_count();
        if output.components() != components {
            return Err(invalid(format!(
                "{} output components, expected {}",
                output.components(),
                components
            )));
        }
        let values = (0..output.count())
            .map(|i| match components {
                3 => output
                    .normalized_floats::<3>(i)
                    .map(|[x, y, z]| [x, y, z, 0.0]),
                _ => output.normalized_floats::<4>(i),
            })
            .collect::<Option<Vec<[f32; 4]>>>()
            .ok_or_else(|| ImportError::accessor(format!("{} output", prefix)))?;

        let (interpolator, samples_per_key) = match sampler.interpolation() {
            gltf::animation::Interpolation::Step => (Interpolator::Constant, 1),
            gltf::animation::Interpolation::Linear => (Interpolator::Linear, 1),
            gltf::animation::Interpolation::CubicSpline => (Interpolator::CubicSpline, 3),
        };
        if values.len() != times.len() * samples_per_key {
            return Err(invalid(format!(
                "{} key times but {} output values",
                times.len(),
                values.len()
            )));
        }

        let mut channels = Vec::with_capacity(components);
        for element in 0..components {
            let keys: Vec<Keyframe> = times
                .iter()
                .enumerate()
                .map(|(k, &time)| {
                    if samples_per_key == 3 {
                        // (in-tangent, value, out-tangent) triplets
                        let base = k * 3;
                        Keyframe {
                            time,
                            value: values[base + 1][element],
                            in_tangent: values[base][element],
                            out_tangent: values[base + 2][element],
                        }
                    } else {
                        Keyframe::new(time, values[k][element])
                    }
                })
                .collect();

            let name = format!("{}_{}", prefix, element);
            let channel = Channel::new(name.clone(), target, element, interpolator, keys)
                .map_err(|source| ImportError::Channel {
                    name: name.clone(),
                    source,
                })?;
            channels.push(self.registry.insert_channel(Arc::new(channel)));
        }
        Ok(channels)
    }
}
