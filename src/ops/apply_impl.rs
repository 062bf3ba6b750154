// SPDX-FileCopyrightText: 2026 Bruno Meilick
// SPDX-License-Identifier: LicenseRef-Nereid-FreeUse-NoCopy-NoDerivatives
//
// All rights reserved.
//
// This file is part of Proteus and is proprietary software.
// Unauthorized copying, modification, or distribution is prohibited.

/// Applies one operation and returns how many nodes it actually changed.
///
/// Resolution runs first, then fragment parsing, then the no-match policy; every target is
/// checked before the first mutation so a rejected operation never leaves half its matches
/// edited.
pub fn apply_operation(
    doc: &mut Document,
    op: &Operation,
    filter: Option<&PageFilter>,
) -> Result<usize, ApplyError> {
    let selection = resolve(doc, &op.locator, filter)?;
    let query = selection.query;

    let fragment = match &op.edit {
        Edit::InsertElement { new_xml, .. } | Edit::ReplaceElement { new_xml } => {
            Some(Document::parse_fragment(new_xml).map_err(ApplyError::Fragment)?)
        }
        _ => None,
    };

    if selection.nodes.is_empty() {
        return if op.allow_no_match { Ok(0) } else { Err(ApplyError::NoMatch { query }) };
    }

    let targets = element_targets(doc, &query, &selection.nodes)?;
    let root = doc.root_element();

    match &op.edit {
        Edit::SetAttribute { key, value } => {
            let mut changed = 0;
            for &target in &targets {
                if let Some(element) = doc.element_mut(target) {
                    let previous = element.set_attribute(key.as_str(), value.as_str());
                    if previous.as_deref() != Some(value.as_str()) {
                        changed += 1;
                    }
                }
            }
            Ok(changed)
        }
        Edit::RemoveAttribute { key } => {
            let mut changed = 0;
            for &target in &targets {
                if let Some(element) = doc.element_mut(target) {
                    if element.remove_attribute(key).is_some() {
                        changed += 1;
                    }
                }
            }
            Ok(changed)
        }
        Edit::SetTextContent { value } => {
            let mut changed = 0;
            for &target in &targets {
                if text_matches(doc, target, value) {
                    continue;
                }
                doc.replace_children_with_text(target, value).map_err(ApplyError::Tree)?;
                changed += 1;
            }
            Ok(changed)
        }
        Edit::RemoveElement => {
            if targets.contains(&root) {
                return Err(ApplyError::RootImmutable { kind: OpKind::RemoveElement });
            }
            for &target in &targets {
                doc.detach(target).map_err(ApplyError::Tree)?;
            }
            Ok(targets.len())
        }
        Edit::ReplaceElement { .. } => {
            let Some(fragment) = fragment else {
                return Ok(0);
            };
            if targets.contains(&root) {
                return Err(ApplyError::RootImmutable { kind: OpKind::ReplaceElement });
            }
            let placements = targets
                .iter()
                .map(|&target| doc.parent(target).map(|parent| (parent, Some(target))))
                .collect::<Option<Vec<_>>>()
                .ok_or(ApplyError::RootImmutable { kind: OpKind::ReplaceElement })?;
            check_fragment_ids(doc, &fragment, &placements)?;
            for &target in &targets {
                let parent = doc.parent(target).ok_or(ApplyError::RootImmutable {
                    kind: OpKind::ReplaceElement,
                })?;
                let index = doc.position_in_parent(target).unwrap_or(usize::MAX);
                doc.detach(target).map_err(ApplyError::Tree)?;
                let copy = doc.import_subtree(&fragment, fragment.root_element());
                doc.insert_child(parent, index, copy).map_err(ApplyError::Tree)?;
            }
            Ok(targets.len())
        }
        Edit::InsertElement { position, .. } => {
            let Some(fragment) = fragment else {
                return Ok(0);
            };
            let sibling = matches!(position, InsertPosition::Before | InsertPosition::After);
            if sibling && targets.contains(&root) {
                return Err(ApplyError::SiblingOfRoot { position: *position });
            }
            let landing = targets
                .iter()
                .map(|&target| match position {
                    InsertPosition::Append | InsertPosition::Prepend => Some((target, None)),
                    InsertPosition::Before | InsertPosition::After => doc.parent(target).map(|parent| (parent, None)),
                })
                .collect::<Option<Vec<_>>>()
                .ok_or(ApplyError::SiblingOfRoot { position: *position })?;
            check_fragment_ids(doc, &fragment, &landing)?;
            for &target in &targets {
                let (parent, index) = match position {
                    InsertPosition::Append => (target, usize::MAX),
                    InsertPosition::Prepend => (target, 0),
                    InsertPosition::Before | InsertPosition::After => {
                        let parent = doc
                            .parent(target)
                            .ok_or(ApplyError::SiblingOfRoot { position: *position })?;
                        let at = doc.position_in_parent(target).unwrap_or(0);
                        (parent, if *position == InsertPosition::After { at + 1 } else { at })
                    }
                };
                let copy = doc.import_subtree(&fragment, fragment.root_element());
                doc.insert_child(parent, index, copy).map_err(ApplyError::Tree)?;
            }
            Ok(targets.len())
        }
    }
}

fn element_targets(doc: &Document, query: &str, nodes: &[NodeRef]) -> Result<Vec<NodeId>, ApplyError> {
    nodes
        .iter()
        .map(|found| match found {
            NodeRef::Attribute { .. } => Err(ApplyError::WrongNodeKind {
                query: query.to_owned(),
                expected: "element",
                found: "attribute",
            }),
            NodeRef::Node(id) => match doc.kind(*id) {
                NodeKind::Element => Ok(*id),
                other => Err(ApplyError::WrongNodeKind {
                    query: query.to_owned(),
                    expected: "element",
                    found: other.as_str(),
                }),
            },
        })
        .collect()
}

fn text_matches(doc: &Document, target: NodeId, value: &str) -> bool {
    match doc.children(target) {
        [] => value.is_empty(),
        [only] => doc.kind(*only) == NodeKind::Text && doc.text(*only) == Some(value),
        _ => false,
    }
}

/// The page container (a child of the root element) holding `node`, or `None` above page level.
fn page_scope(doc: &Document, node: NodeId) -> Option<NodeId> {
    let root = doc.root_element();
    std::iter::once(node).chain(doc.ancestors(node)).find(|&candidate| doc.parent(candidate) == Some(root))
}

/// Rejects fragments whose `id`s would collide with ids already on the page they land in.
///
/// Each placement is the parent receiving a copy plus the node it replaces, whose ids are about
/// to disappear and may be reused. A copy landing directly under the root element becomes a page
/// of its own, so only its top-level id is compared against the other pages.
fn check_fragment_ids(
    doc: &Document,
    fragment: &Document,
    placements: &[(NodeId, Option<NodeId>)],
) -> Result<(), ApplyError> {
    let mut scopes_seen = Vec::new();
    for &(parent, replaced) in placements {
        let scope = page_scope(doc, parent);
        let (incoming, mut existing) = match scope {
            Some(page) => (fragment.element_ids(), doc.element_ids_within(page)),
            None => {
                let root = fragment.root_element();
                let own: BTreeSet<String> = fragment
                    .element(root)
                    .and_then(|el| el.attribute("id"))
                    .map(str::to_owned)
                    .into_iter()
                    .collect();
                let pages = doc
                    .element_children(doc.root_element())
                    .filter_map(|page| doc.element(page).and_then(|el| el.attribute("id")))
                    .map(str::to_owned)
                    .collect();
                (own, pages)
            }
        };
        let Some(first) = incoming.iter().next() else {
            continue;
        };
        if scopes_seen.contains(&scope) {
            return Err(ApplyError::DuplicateId { id: first.clone() });
        }
        scopes_seen.push(scope);

        if let Some(node) = replaced {
            for id in doc.element_ids_within(node) {
                existing.remove(&id);
            }
        }
        if let Some(id) = incoming.iter().find(|id| existing.contains(*id)) {
            return Err(ApplyError::DuplicateId { id: id.clone() });
        }
    }
    Ok(())
}
