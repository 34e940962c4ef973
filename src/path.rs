//! Component F: path resolution.
//!
//! Splits an absolute path into components and walks the inode graph one
//! directory lookup at a time (`spec.md` §4.F). Paths are always absolute;
//! there is no notion of a current working directory.

use crate::error::{Error, Result};
use crate::graph::{Graph, NameSource};
use crate::id::{RecordId, ROOT_DIR};
use alloc::vec::Vec;

/// Splits `path` into its non-empty components, requiring a leading `/`.
/// Repeated or trailing slashes collapse away (`/a//b/` and `/a/b` split
/// identically).
pub fn split(path: &[u8]) -> Result<Vec<&[u8]>> {
    if path.first() != Some(&b'/') {
        return Err(Error::InvalidArgument);
    }
    Ok(path[1..]
        .split(|&b| b == b'/')
        .filter(|c| !c.is_empty())
        .collect())
}

/// Resolves `path` to the id of the inode it names. `/` resolves to
/// [`ROOT_DIR`]. Returns [`Error::NotFound`] if any component is missing,
/// or [`Error::InvalidArgument`] if a non-terminal component names a file
/// rather than a directory.
pub fn resolve(graph: &Graph, names: &mut dyn NameSource, path: &[u8]) -> Result<RecordId> {
    let comps = split(path)?;
    let mut cur = ROOT_DIR;
    for comp in &comps {
        graph.dir(cur)?;
        cur = graph.lookup_child(names, cur, comp)?.ok_or(Error::NotFound)?;
    }
    Ok(cur)
}

/// Resolves the parent directory of `path` and returns it along with the
/// final component's name. Used by every operation that creates, removes,
/// or renames a leaf (`mkdir`, file creation, `unlink`, `rename`).
/// Returns [`Error::InvalidArgument`] for `/` itself, which has no parent.
pub fn resolve_parent<'a>(
    graph: &Graph,
    names: &mut dyn NameSource,
    path: &'a [u8],
) -> Result<(RecordId, &'a [u8])> {
    let comps = split(path)?;
    let (leaf, parents) = comps.split_last().ok_or(Error::InvalidArgument)?;
    let mut cur = ROOT_DIR;
    for comp in parents {
        graph.dir(cur)?;
        cur = graph.lookup_child(names, cur, comp)?.ok_or(Error::NotFound)?;
    }
    graph.dir(cur)?;
    Ok((cur, leaf))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::FlashLocation;
    use crate::id::Kind;
    use alloc::collections::BTreeMap;
    use alloc::vec;

    struct FakeNames(BTreeMap<RecordId, Vec<u8>>);

    impl NameSource for FakeNames {
        fn name_of(&mut self, id: RecordId, _location: FlashLocation) -> Result<Vec<u8>> {
            Ok(self.0.get(&id).cloned().unwrap_or_default())
        }
    }

    fn loc() -> FlashLocation {
        FlashLocation::new(0, 16)
    }

    fn sample() -> (Graph, FakeNames, RecordId, RecordId) {
        let mut g = Graph::new(8, 8);
        g.insert_dir(ROOT_DIR, loc(), 0, ROOT_DIR, vec![]).unwrap();
        let sub = RecordId::new(Kind::Directory, 2);
        g.insert_dir(sub, loc(), 0, ROOT_DIR, vec![]).unwrap();
        let file = RecordId::new(Kind::File, 0);
        g.insert_file(file, loc(), 0, sub).unwrap();
        let mut names = FakeNames(BTreeMap::from([
            (sub, b"sub".to_vec()),
            (file, b"leaf.txt".to_vec()),
        ]));
        g.add_child(&mut names, ROOT_DIR, sub, loc()).unwrap();
        g.add_child(&mut names, sub, file, loc()).unwrap();
        (g, names, sub, file)
    }

    #[test]
    fn root_resolves_to_root_dir() {
        let (g, mut names, _, _) = sample();
        assert_eq!(resolve(&g, &mut names, b"/").unwrap(), ROOT_DIR);
    }

    #[test]
    fn nested_path_resolves() {
        let (g, mut names, _sub, file) = sample();
        assert_eq!(resolve(&g, &mut names, b"/sub/leaf.txt").unwrap(), file);
    }

    #[test]
    fn duplicate_slashes_collapse() {
        let (g, mut names, _sub, file) = sample();
        assert_eq!(resolve(&g, &mut names, b"/sub//leaf.txt/").unwrap(), file);
    }

    #[test]
    fn missing_component_is_not_found() {
        let (g, mut names, _, _) = sample();
        assert_eq!(resolve(&g, &mut names, b"/nope").unwrap_err(), Error::NotFound);
    }

    #[test]
    fn walking_through_a_file_is_invalid() {
        let (g, mut names, _, _) = sample();
        assert_eq!(
            resolve(&g, &mut names, b"/sub/leaf.txt/more").unwrap_err(),
            Error::InvalidArgument
        );
    }

    #[test]
    fn relative_path_is_rejected() {
        let (g, mut names, _, _) = sample();
        assert_eq!(resolve(&g, &mut names, b"sub/leaf.txt").unwrap_err(), Error::InvalidArgument);
    }

    #[test]
    fn resolve_parent_splits_leaf() {
        let (g, mut names, sub, _) = sample();
        let (parent, leaf) = resolve_parent(&g, &mut names, b"/sub/new.txt").unwrap();
        assert_eq!(parent, sub);
        assert_eq!(leaf, b"new.txt");
    }

    #[test]
    fn root_has_no_parent() {
        let (g, mut names, _, _) = sample();
        assert_eq!(resolve_parent(&g, &mut names, b"/").unwrap_err(), Error::InvalidArgument);
    }
}
