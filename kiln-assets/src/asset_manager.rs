use fnv::FnvHashMap;
use kiln_base::AssetId;
use std::sync::{Arc, RwLock};

/// A loadable file, addressed by the hash of its virtual path
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Asset {
    pub asset_id: AssetId,
    /// Virtual path including the extension, for example `Example/Mesh/Character/Imrod.mesh`
    pub virtual_filename: String,
}

impl Asset {
    pub fn new(virtual_filename: &str) -> Self {
        Asset {
            asset_id: AssetId::from_virtual_path(virtual_filename),
            virtual_filename: virtual_filename.to_string(),
        }
    }
}

/// A named set of assets, usually everything below one mount point
#[derive(Default)]
pub struct AssetPackage {
    name: String,
    assets: FnvHashMap<AssetId, Asset>,
}

impl AssetPackage {
    pub fn new(name: &str) -> Self {
        AssetPackage {
            name: name.to_string(),
            assets: Default::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_asset(
        &mut self,
        virtual_filename: &str,
    ) -> AssetId {
        let asset = Asset::new(virtual_filename);
        let asset_id = asset.asset_id;
        if let Some(previous) = self.assets.insert(asset_id, asset) {
            if previous.virtual_filename != virtual_filename {
                log::warn!(
                    "Asset {} in package {} replaces {} which has the same asset id {:?}",
                    virtual_filename,
                    self.name,
                    previous.virtual_filename,
                    asset_id
                );
            }
        }
        asset_id
    }

    pub fn try_get_asset_by_asset_id(
        &self,
        asset_id: AssetId,
    ) -> Option<&Asset> {
        self.assets.get(&asset_id)
    }

    pub fn number_of_assets(&self) -> usize {
        self.assets.len()
    }
}

/// Registry of every known asset. Cloning shares the registry, resource managers look assets up
/// from the update thread while packages may be mounted at any time.
#[derive(Clone, Default)]
pub struct AssetManager {
    packages: Arc<RwLock<Vec<AssetPackage>>>,
}

impl AssetManager {
    pub fn new() -> Self {
        Default::default()
    }

    /// Packages mounted later take precedence
    pub fn mount_asset_package(
        &self,
        package: AssetPackage,
    ) {
        log::debug!(
            "Mounted asset package {} with {} assets",
            package.name(),
            package.number_of_assets()
        );
        self.packages.write().unwrap().push(package);
    }

    pub fn unmount_asset_package(
        &self,
        name: &str,
    ) -> Option<AssetPackage> {
        let mut packages = self.packages.write().unwrap();
        let index = packages.iter().position(|x| x.name() == name)?;
        Some(packages.remove(index))
    }

    pub fn try_get_asset_by_asset_id(
        &self,
        asset_id: AssetId,
    ) -> Option<Asset> {
        self.packages
            .read()
            .unwrap()
            .iter()
            .rev()
            .find_map(|package| package.try_get_asset_by_asset_id(asset_id))
            .cloned()
    }

    pub fn number_of_asset_packages(&self) -> usize {
        self.packages.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_lookup() {
        let asset_manager = AssetManager::new();
        let mut base = AssetPackage::new("Base");
        let mesh = base.add_asset("Example/Mesh/Imrod.mesh");
        assert_eq!(mesh, AssetId::from_virtual_path("Example/Mesh/Imrod"));
        asset_manager.mount_asset_package(base);

        let mut patch = AssetPackage::new("Patch");
        patch.add_asset("Patch/Mesh/Imrod.mesh");
        asset_manager.mount_asset_package(patch);

        assert_eq!(
            asset_manager
                .try_get_asset_by_asset_id(mesh)
                .unwrap()
                .virtual_filename,
            "Example/Mesh/Imrod.mesh"
        );
        assert!(asset_manager
            .try_get_asset_by_asset_id(AssetId::from_virtual_path("Example/Mesh/Missing"))
            .is_none());

        assert!(asset_manager.unmount_asset_package("Base").is_some());
        assert!(asset_manager.try_get_asset_by_asset_id(mesh).is_none());
        assert_eq!(asset_manager.number_of_asset_packages(), 1);
    }
}
